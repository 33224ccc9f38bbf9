//! On-disk naming shared by acquisition, reassembly and recovery.

use std::path::{Path, PathBuf};

use crate::error::DownloadError;

pub const FRAGMENT_PREFIX: &str = "fragment_";
pub const FRAGMENT_EXTENSION: &str = "ts";
pub const PROGRESS_FILE_NAME: &str = "progress.json";
pub const CONCAT_LIST_FILE_NAME: &str = "filelist.txt";
pub const SESSION_DIR_SUFFIX: &str = "_fragments";
/// Suffix of a fragment that is still being written.
pub const PART_SUFFIX: &str = ".part";

/// `fragment_00000.ts` style name for the `index`-th downloaded fragment.
pub fn fragment_file_name(index: usize) -> String {
    format!("{FRAGMENT_PREFIX}{index:05}.{FRAGMENT_EXTENSION}")
}

/// Ordinal embedded in a fragment file name, if it is one.
pub fn parse_fragment_index(file_name: &str) -> Option<u64> {
    let stem = file_name
        .strip_suffix(FRAGMENT_EXTENSION)?
        .strip_suffix('.')?;
    let digits = stem.strip_prefix(FRAGMENT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Fragment files in `dir`, ordered by their numeric index.
pub async fn list_fragments(dir: &Path) -> Result<Vec<PathBuf>, DownloadError> {
    let mut indexed = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(parse_fragment_index) {
            indexed.push((index, entry.path()));
        }
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, path)| path).collect())
}

/// Remove fragment files numbered `keep_below` or higher together with any
/// `.part` leftovers. Returns the number of files removed.
pub async fn prune_fragments(dir: &Path, keep_below: u64) -> Result<usize, DownloadError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let stale = match parse_fragment_index(name) {
            Some(index) => index >= keep_below,
            None => name.ends_with(PART_SUFFIX),
        };
        if stale {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

pub fn session_dir_name(session_name: &str) -> String {
    format!("{session_name}{SESSION_DIR_SUFFIX}")
}

pub fn is_fragment_like(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(FRAGMENT_EXTENSION))
}
