//! Reassembly: fragment directory → single output file.
//!
//! Stages run in order: concat into `temp_<name>`, optional metadata into
//! `meta_<name>`, optional thumbnail into the output. Only concat is
//! required; a failed optional stage carries the previous file forward and
//! is recorded in [`MergeReport::degraded_stages`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MergeOptions;
use crate::error::DownloadError;
use crate::events::{EventSink, MergeStage};
use crate::layout::{CONCAT_LIST_FILE_NAME, PROGRESS_FILE_NAME, list_fragments};
use crate::tool::{MediaTool, ToolContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub output: PathBuf,
    pub fragments_merged: usize,
    /// Optional stages that failed and were skipped.
    pub degraded_stages: Vec<MergeStage>,
}

impl MergeReport {
    pub fn is_degraded(&self) -> bool {
        !self.degraded_stages.is_empty()
    }
}

pub struct ReassemblyEngine {
    tool: Arc<dyn MediaTool>,
    ctx: ToolContext,
}

impl ReassemblyEngine {
    pub fn new(tool: Arc<dyn MediaTool>, events: EventSink, token: CancellationToken) -> Self {
        Self {
            tool,
            ctx: ToolContext { events, token },
        }
    }

    pub async fn process(
        &self,
        fragments_dir: &Path,
        output_file: &Path,
        options: &MergeOptions,
    ) -> Result<MergeReport, DownloadError> {
        let events = &self.ctx.events;

        if !tokio::fs::metadata(fragments_dir)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            events.error(format!(
                "Fragments directory not found: {}",
                fragments_dir.display()
            ));
            return Err(DownloadError::FragmentsDirMissing {
                path: fragments_dir.to_path_buf(),
            });
        }

        let version = self.tool.version().await.inspect_err(|e| {
            events.error(format!("{e}. Install it or point the ffmpeg path at it."));
        })?;
        debug!(tool = self.tool.name(), %version, "Media tool available");

        let fragments_dir = tokio::fs::canonicalize(fragments_dir).await?;
        let fragments = list_fragments(&fragments_dir).await?;
        if fragments.is_empty() {
            events.error("No fragment files found to merge");
            return Err(DownloadError::NoFragments {
                location: fragments_dir.display().to_string(),
            });
        }

        let file_name = output_file
            .file_name()
            .ok_or_else(|| {
                DownloadError::configuration(format!(
                    "output path {} has no file name",
                    output_file.display()
                ))
            })?
            .to_string_lossy()
            .into_owned();
        let out_dir = match output_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&out_dir).await?;
        let temp_file = out_dir.join(format!("temp_{file_name}"));
        let meta_file = out_dir.join(format!("meta_{file_name}"));

        // 1. concat
        events.info(format!(
            "Merging {} fragments from {} into {}",
            fragments.len(),
            fragments_dir.display(),
            temp_file.display()
        ));
        self.concat(&fragments_dir, &fragments, &temp_file).await?;

        let mut degraded = Vec::new();
        let mut current = temp_file;

        // 2. metadata
        if options.has_metadata() {
            if self.ctx.token.is_cancelled() {
                degraded.push(MergeStage::Metadata);
            } else {
                events.info(format!("Adding metadata to {}", current.display()));
                if let Err(e) = self
                    .tool
                    .write_metadata(&current, &meta_file, &options.metadata, &self.ctx)
                    .await
                {
                    events.warn(format!("Adding metadata failed, keeping merged file: {e}"));
                    degraded.push(MergeStage::Metadata);
                    move_file(&current, &meta_file).await?;
                } else {
                    remove_if_exists(&current).await;
                }
                current = meta_file;
            }
        }

        // 3. thumbnail, or plain finalize
        let mut thumbnail = options.thumbnail_path.as_deref();
        if let Some(path) = thumbnail
            && !tokio::fs::try_exists(path).await.unwrap_or(false)
        {
            events.warn(format!(
                "Thumbnail {} does not exist, skipping",
                path.display()
            ));
            thumbnail = None;
        }

        match thumbnail {
            Some(thumbnail) if !self.ctx.token.is_cancelled() => {
                events.info(format!(
                    "Embedding thumbnail {} into {}",
                    thumbnail.display(),
                    output_file.display()
                ));
                if let Err(e) = self
                    .tool
                    .attach_thumbnail(&current, thumbnail, output_file, &self.ctx)
                    .await
                {
                    events.warn(format!("Embedding thumbnail failed, keeping previous file: {e}"));
                    degraded.push(MergeStage::Thumbnail);
                    move_file(&current, output_file).await?;
                } else {
                    remove_if_exists(&current).await;
                }
            }
            Some(_) => {
                degraded.push(MergeStage::Thumbnail);
                move_file(&current, output_file).await?;
            }
            None => move_file(&current, output_file).await?,
        }

        // 4. cleanup
        if options.keep_fragments {
            info!("Keeping fragment files as requested");
        } else {
            clean_up_fragments(&fragments_dir, &fragments).await;
        }

        for stage in &degraded {
            warn!(stage = %stage, "Stage degraded");
        }
        events.info(format!(
            "Stream processing complete. Output file: {}",
            output_file.display()
        ));

        Ok(MergeReport {
            output: output_file.to_path_buf(),
            fragments_merged: fragments.len(),
            degraded_stages: degraded,
        })
    }

    async fn concat(
        &self,
        fragments_dir: &Path,
        fragments: &[PathBuf],
        temp_file: &Path,
    ) -> Result<(), DownloadError> {
        let list_path = fragments_dir.join(CONCAT_LIST_FILE_NAME);
        tokio::fs::write(&list_path, concat_list(fragments)).await?;

        let result = self.tool.concat(&list_path, temp_file, &self.ctx).await;
        remove_if_exists(&list_path).await;

        if let Err(e) = result {
            self.ctx.events.error(format!("Merging fragments failed: {e}"));
            remove_if_exists(temp_file).await;
            return Err(e);
        }
        info!(fragments = fragments.len(), output = %temp_file.display(), "Fragments merged");
        Ok(())
    }
}

/// Concat demuxer list with one `file '<path>'` line per fragment.
pub fn concat_list(fragments: &[PathBuf]) -> String {
    let mut list = String::new();
    for path in fragments {
        let escaped = path.to_string_lossy().replace('\'', "'\\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    list
}

/// Rename `from` to `to`, falling back to copy + remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<(), DownloadError> {
    remove_if_exists(to).await;
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    remove_if_exists(from).await;
    Ok(())
}

async fn remove_if_exists(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove file");
    }
}

async fn clean_up_fragments(dir: &Path, fragments: &[PathBuf]) {
    for fragment in fragments {
        remove_if_exists(fragment).await;
    }
    remove_if_exists(&dir.join(PROGRESS_FILE_NAME)).await;
    info!(count = fragments.len(), "Cleaned up fragment files");
}
