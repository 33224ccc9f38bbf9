use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::DownloadError;
use crate::layout::PROGRESS_FILE_NAME;

/// Snapshot of acquisition progress, rewritten after every fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub fragments_total: usize,
    /// Number of fragments attempted so far (successful or zero-byte).
    pub fragments_downloaded: usize,
    /// Media sequence number of the most recent fragment.
    pub last_fragment: u64,
    pub last_url: String,
}

impl ProgressRecord {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(PROGRESS_FILE_NAME)
    }

    /// Read the record in `dir`; `None` when no download has recorded
    /// progress there yet.
    pub async fn load(dir: &Path) -> Result<Option<Self>, DownloadError> {
        match tokio::fs::read(Self::path_in(dir)).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the record in `dir`, if there is one.
    pub async fn remove(dir: &Path) -> Result<(), DownloadError> {
        match tokio::fs::remove_file(Self::path_in(dir)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the record in `dir`. Readers see either the previous record
    /// or this one, never a partial write.
    pub async fn store(&self, dir: &Path) -> Result<(), DownloadError> {
        let target = Self::path_in(dir);
        let tmp = dir.join(format!("{PROGRESS_FILE_NAME}.tmp"));
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &target).await?;
        trace!(
            downloaded = self.fragments_downloaded,
            total = self.fragments_total,
            "Progress recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(downloaded: usize) -> ProgressRecord {
        ProgressRecord {
            fragments_total: 5,
            fragments_downloaded: downloaded,
            last_fragment: 100 + downloaded as u64 - 1,
            last_url: format!("https://cdn.test/seg{downloaded}.ts"),
        }
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ProgressRecord::load(dir.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn store_replaces_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        record(1).store(dir.path()).await.unwrap();
        record(2).store(dir.path()).await.unwrap();

        let loaded = ProgressRecord::load(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded, record(2));
        assert!(!dir.path().join("progress.json.tmp").exists());
    }

    #[tokio::test]
    async fn uses_documented_field_names() {
        let dir = tempfile::tempdir().unwrap();
        record(3).store(dir.path()).await.unwrap();
        let raw = tokio::fs::read_to_string(dir.path().join("progress.json"))
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["fragments_total"], 5);
        assert_eq!(value["fragments_downloaded"], 3);
        assert_eq!(value["last_fragment"], 102);
        assert_eq!(value["last_url"], "https://cdn.test/seg3.ts");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        record(1).store(dir.path()).await.unwrap();
        ProgressRecord::remove(dir.path()).await.unwrap();
        ProgressRecord::remove(dir.path()).await.unwrap();
        assert_eq!(ProgressRecord::load(dir.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("progress.json"), b"{not json")
            .await
            .unwrap();
        assert!(matches!(
            ProgressRecord::load(dir.path()).await,
            Err(DownloadError::Json { .. })
        ));
    }
}
