//! Salvage of interrupted sessions into a playable `_partial` file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::MergeOptions;
use crate::error::DownloadError;
use crate::events::EventSink;
use crate::layout::{is_fragment_like, session_dir_name};
use crate::reassembly::ReassemblyEngine;
use crate::tool::MediaTool;

/// Why a session stopped before producing its final file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    /// The caller asked to stop.
    Cancelled,
    /// Acquisition returned an error.
    Errored,
    /// Acquisition panicked.
    Exception,
}

impl InterruptReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Errored => "errored",
            Self::Exception => "exception",
        }
    }
}

impl fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SalvageOutcome {
    Recovered(PathBuf),
    NothingToSalvage,
    Failed(String),
}

pub struct PartialRecoverySweep {
    tool: Arc<dyn MediaTool>,
    events: EventSink,
}

impl PartialRecoverySweep {
    pub fn new(tool: Arc<dyn MediaTool>, events: EventSink) -> Self {
        Self { tool, events }
    }

    /// Locate the fragment directory of `session_name` under `output_dir`.
    ///
    /// Only `<session_name>_fragments` itself qualifies, and only while it
    /// holds at least one `.ts` file. Directories of other sessions are never
    /// picked up.
    pub async fn find_session_dir(output_dir: &Path, session_name: &str) -> Option<PathBuf> {
        let dir = output_dir.join(session_dir_name(session_name));
        match tokio::fs::metadata(&dir).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return None,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "No session directory to salvage");
                return None;
            }
        }
        has_fragment_files(&dir).await.then_some(dir)
    }

    /// Merge whatever fragments an interrupted session left behind into
    /// `<output_dir>/<dir name>_partial.<extension>`.
    ///
    /// Runs with its own cancellation token: a session that was cancelled
    /// still gets its partial file.
    pub async fn salvage(
        &self,
        output_dir: &Path,
        session_name: &str,
        reason: InterruptReason,
        keep_fragments: bool,
        base_options: &MergeOptions,
        extension: &str,
    ) -> SalvageOutcome {
        let Some(dir) = Self::find_session_dir(output_dir, session_name).await else {
            self.events
                .info("No partial fragments found, nothing to salvage");
            return SalvageOutcome::NothingToSalvage;
        };

        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| session_dir_name(session_name));
        let output = output_dir.join(format!(
            "{dir_name}_partial.{}",
            extension.trim_start_matches('.')
        ));

        let mut options = base_options.clone();
        options.keep_fragments = keep_fragments;
        options.metadata.insert(
            "comment".to_string(),
            format!("partial download ({reason})"),
        );

        self.events.info(format!(
            "Download {reason}, salvaging fragments from {} into {}",
            dir.display(),
            output.display()
        ));

        let engine =
            ReassemblyEngine::new(self.tool.clone(), self.events.clone(), CancellationToken::new());
        match engine.process(&dir, &output, &options).await {
            Ok(report) => {
                self.events.info(format!(
                    "Recovered {} fragments into {}",
                    report.fragments_merged,
                    report.output.display()
                ));
                SalvageOutcome::Recovered(report.output)
            }
            Err(DownloadError::NoFragments { .. }) => SalvageOutcome::NothingToSalvage,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Salvage failed");
                self.events.error(format!("Could not salvage partial download: {e}"));
                SalvageOutcome::Failed(e.to_string())
            }
        }
    }
}

async fn has_fragment_files(dir: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if is_fragment_like(&entry.path())
            && entry.file_type().await.is_ok_and(|t| t.is_file())
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{fragment_file_name, list_fragments};
    use crate::test_support::FakeTool;
    use std::time::Duration;

    async fn session_dir(root: &Path, name: &str, fragments: usize) -> PathBuf {
        let dir = root.join(name);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        for index in 0..fragments {
            tokio::fs::write(dir.join(fragment_file_name(index)), format!("<{index}>"))
                .await
                .unwrap();
        }
        dir
    }

    fn sweep(tool: FakeTool) -> PartialRecoverySweep {
        PartialRecoverySweep::new(Arc::new(tool), EventSink::disabled())
    }

    #[test]
    fn reasons_render_lowercase() {
        assert_eq!(InterruptReason::Cancelled.to_string(), "cancelled");
        assert_eq!(InterruptReason::Errored.to_string(), "errored");
        assert_eq!(InterruptReason::Exception.to_string(), "exception");
    }

    #[tokio::test]
    async fn exact_session_directory_wins() {
        let root = tempfile::tempdir().unwrap();
        let own = session_dir(root.path(), "show_fragments", 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        session_dir(root.path(), "newer_fragments", 1).await;

        let found = PartialRecoverySweep::find_session_dir(root.path(), "show").await;
        assert_eq!(found, Some(own));
    }

    #[tokio::test]
    async fn other_sessions_are_never_touched() {
        let root = tempfile::tempdir().unwrap();
        session_dir(root.path(), "show_fragments", 0).await;
        let foreign = session_dir(root.path(), "yesterday_fragments", 2).await;

        assert_eq!(
            PartialRecoverySweep::find_session_dir(root.path(), "show").await,
            None
        );
        let outcome = sweep(FakeTool::default())
            .salvage(
                root.path(),
                "show",
                InterruptReason::Errored,
                false,
                &MergeOptions::default(),
                "mp4",
            )
            .await;

        assert_eq!(outcome, SalvageOutcome::NothingToSalvage);
        assert_eq!(list_fragments(&foreign).await.unwrap().len(), 2);
        assert!(!root.path().join("yesterday_fragments_partial.mp4").exists());
    }

    #[tokio::test]
    async fn directories_without_fragments_do_not_qualify() {
        let root = tempfile::tempdir().unwrap();
        session_dir(root.path(), "show_fragments", 0).await;
        assert_eq!(
            PartialRecoverySweep::find_session_dir(root.path(), "show").await,
            None
        );
        assert_eq!(
            PartialRecoverySweep::find_session_dir(&root.path().join("missing"), "show").await,
            None
        );
    }

    #[tokio::test]
    async fn salvage_writes_partial_file_with_comment() {
        let root = tempfile::tempdir().unwrap();
        let dir = session_dir(root.path(), "show_fragments", 2).await;

        let outcome = sweep(FakeTool::default())
            .salvage(
                root.path(),
                "show",
                InterruptReason::Cancelled,
                true,
                &MergeOptions::default(),
                "mp4",
            )
            .await;

        let expected = root.path().join("show_fragments_partial.mp4");
        assert_eq!(outcome, SalvageOutcome::Recovered(expected.clone()));
        assert_eq!(
            tokio::fs::read_to_string(&expected).await.unwrap(),
            "<0><1>{comment=partial download (cancelled)}"
        );
        assert_eq!(list_fragments(&dir).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn salvage_without_keep_removes_fragments() {
        let root = tempfile::tempdir().unwrap();
        let dir = session_dir(root.path(), "show_fragments", 1).await;

        let outcome = sweep(FakeTool::default())
            .salvage(
                root.path(),
                "show",
                InterruptReason::Errored,
                false,
                &MergeOptions::default(),
                ".mkv",
            )
            .await;

        assert_eq!(
            outcome,
            SalvageOutcome::Recovered(root.path().join("show_fragments_partial.mkv"))
        );
        assert!(list_fragments(&dir).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn nothing_to_salvage_and_tool_failure() {
        let root = tempfile::tempdir().unwrap();
        let outcome = sweep(FakeTool::default())
            .salvage(
                root.path(),
                "show",
                InterruptReason::Exception,
                true,
                &MergeOptions::default(),
                "mp4",
            )
            .await;
        assert_eq!(outcome, SalvageOutcome::NothingToSalvage);

        session_dir(root.path(), "show_fragments", 1).await;
        let outcome = sweep(FakeTool {
            unavailable: true,
            ..FakeTool::default()
        })
        .salvage(
            root.path(),
            "show",
            InterruptReason::Exception,
            true,
            &MergeOptions::default(),
            "mp4",
        )
        .await;
        assert!(matches!(outcome, SalvageOutcome::Failed(_)));
    }
}
