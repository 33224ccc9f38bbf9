//! One download from manifest URL to finished (or salvaged) file.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{DownloaderConfig, MergeOptions};
use crate::cookies::CookieJar;
use crate::coordinator::{AcquireRequest, AcquisitionCoordinator};
use crate::error::DownloadError;
use crate::events::{EventSink, MergeStage};
use crate::layout::session_dir_name;
use crate::progress::ProgressRecord;
use crate::reassembly::ReassemblyEngine;
use crate::recovery::{InterruptReason, PartialRecoverySweep, SalvageOutcome};
use crate::tool::MediaTool;

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub output_dir: PathBuf,
    /// Base name of the output file and of the `<name>_fragments` directory.
    pub session_name: String,
    pub quality: String,
    pub max_fragments: Option<usize>,
    pub cookies: Option<CookieJar>,
    pub resume: bool,
    pub container_extension: String,
}

impl DownloadRequest {
    pub fn new(
        url: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        session_name: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            output_dir: output_dir.into(),
            session_name: session_name.into(),
            quality: "best".to_string(),
            max_fragments: None,
            cookies: None,
            resume: false,
            container_extension: "mp4".to_string(),
        }
    }

    pub fn fragments_dir(&self) -> PathBuf {
        self.output_dir.join(session_dir_name(&self.session_name))
    }

    pub fn output_file(&self) -> PathBuf {
        self.output_dir.join(format!(
            "{}.{}",
            self.session_name,
            self.container_extension.trim_start_matches('.')
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOutcome {
    pub success: bool,
    /// Final file on success, `_partial` file after a salvaged interruption.
    pub output_path: Option<PathBuf>,
    pub fragments_downloaded: usize,
    pub fragments_total: usize,
    pub reason: Option<String>,
    pub degraded_stages: Vec<MergeStage>,
}

pub struct DownloadSession {
    config: DownloaderConfig,
    tool: Arc<dyn MediaTool>,
    events: EventSink,
}

impl DownloadSession {
    pub fn new(config: DownloaderConfig, tool: Arc<dyn MediaTool>, events: EventSink) -> Self {
        Self {
            config,
            tool,
            events,
        }
    }

    /// Acquire, then reassemble. An interrupted acquisition is handed to the
    /// recovery sweep instead.
    pub async fn run(
        &self,
        request: &DownloadRequest,
        options: &MergeOptions,
        token: CancellationToken,
    ) -> SessionOutcome {
        let fragments_dir = request.fragments_dir();
        let acquire_request = AcquireRequest {
            manifest_url: request.url.clone(),
            output_dir: fragments_dir.clone(),
            quality: request.quality.clone(),
            max_fragments: request.max_fragments,
            cookies: request.cookies.clone(),
            resume: request.resume,
        };
        let coordinator =
            AcquisitionCoordinator::new(self.config.clone(), self.events.clone(), token.clone());

        self.events.info(format!(
            "Starting download of {} into {}",
            request.url,
            fragments_dir.display()
        ));

        let handle = tokio::spawn(async move { coordinator.acquire(&acquire_request).await });

        let (reason, detail) = match handle.await {
            Ok(Ok(report)) => {
                self.events.info(format!(
                    "Downloaded {}/{} fragments ({} failed)",
                    report.fragments_downloaded - report.fragments_failed,
                    report.fragments_total,
                    report.fragments_failed
                ));
                let engine =
                    ReassemblyEngine::new(self.tool.clone(), self.events.clone(), token);
                let output = request.output_file();
                return match engine.process(&fragments_dir, &output, options).await {
                    Ok(merge) => {
                        info!(output = %merge.output.display(), "Session complete");
                        SessionOutcome {
                            success: true,
                            output_path: Some(merge.output),
                            fragments_downloaded: report.fragments_downloaded,
                            fragments_total: report.fragments_total,
                            reason: None,
                            degraded_stages: merge.degraded_stages,
                        }
                    }
                    Err(e) => {
                        self.events.error(format!("Failed to merge fragments: {e}"));
                        SessionOutcome {
                            success: false,
                            output_path: None,
                            fragments_downloaded: report.fragments_downloaded,
                            fragments_total: report.fragments_total,
                            reason: Some(e.to_string()),
                            degraded_stages: Vec::new(),
                        }
                    }
                };
            }
            Ok(Err(DownloadError::Cancelled)) => (InterruptReason::Cancelled, None),
            Ok(Err(e)) => {
                self.events.error(format!("Download failed: {e}"));
                (InterruptReason::Errored, Some(e.to_string()))
            }
            Err(join_error) => {
                error!(error = %join_error, "Acquisition task panicked");
                self.events
                    .error(format!("Download stopped unexpectedly: {join_error}"));
                (InterruptReason::Exception, Some(join_error.to_string()))
            }
        };

        let (fragments_downloaded, fragments_total) =
            match ProgressRecord::load(&fragments_dir).await {
                Ok(Some(record)) => (record.fragments_downloaded, record.fragments_total),
                _ => (0, 0),
            };

        let sweep = PartialRecoverySweep::new(self.tool.clone(), self.events.clone());
        let salvaged = sweep
            .salvage(
                &request.output_dir,
                &request.session_name,
                reason,
                options.keep_fragments,
                options,
                &request.container_extension,
            )
            .await;

        let output_path = match salvaged {
            SalvageOutcome::Recovered(path) => Some(path),
            SalvageOutcome::NothingToSalvage | SalvageOutcome::Failed(_) => None,
        };

        SessionOutcome {
            success: false,
            output_path,
            fragments_downloaded,
            fragments_total,
            reason: Some(match detail {
                Some(detail) => format!("{reason}: {detail}"),
                None => reason.to_string(),
            }),
            degraded_stages: Vec::new(),
        }
    }
}
