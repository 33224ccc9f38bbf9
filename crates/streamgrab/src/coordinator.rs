//! Acquisition: manifest → fragment list → fragment files on disk.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::DownloaderConfig;
use crate::cookies::CookieJar;
use crate::error::DownloadError;
use crate::events::EventSink;
use crate::fetcher::FragmentFetcher;
use crate::layout::{fragment_file_name, prune_fragments};
use crate::manifest::hls::{self, HlsPlaylist};
use crate::manifest::{FragmentDescriptor, ManifestKind, base_url_of, dash};
use crate::progress::ProgressRecord;

#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub manifest_url: String,
    /// Directory that receives the fragment files and `progress.json`.
    pub output_dir: PathBuf,
    /// `best`, `worst`, or a label such as `720p` matched against variant
    /// resolutions and DASH representation ids.
    pub quality: String,
    pub max_fragments: Option<usize>,
    pub cookies: Option<CookieJar>,
    /// Skip fragments a previous run already stored in `output_dir`.
    pub resume: bool,
}

impl AcquireRequest {
    pub fn new(manifest_url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest_url: manifest_url.into(),
            output_dir: output_dir.into(),
            quality: "best".to_string(),
            max_fragments: None,
            cookies: None,
            resume: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionReport {
    pub fragments_total: usize,
    /// Fragments attempted, including ones that came back empty.
    pub fragments_downloaded: usize,
    pub fragments_failed: usize,
    /// Fragments kept from an earlier run.
    pub fragments_skipped: usize,
    pub bytes_written: u64,
    pub fragments_dir: PathBuf,
}

pub struct AcquisitionCoordinator {
    fetcher: FragmentFetcher,
    events: EventSink,
    token: CancellationToken,
}

impl AcquisitionCoordinator {
    pub fn new(config: DownloaderConfig, events: EventSink, token: CancellationToken) -> Self {
        Self {
            fetcher: FragmentFetcher::new(config, token.clone()),
            events,
            token,
        }
    }

    async fn fetch_manifest(
        &self,
        url: &str,
        cookies: Option<&CookieJar>,
    ) -> Result<Bytes, DownloadError> {
        match self.fetcher.fetch(url, cookies).await {
            Ok(data) => Ok(data),
            Err(DownloadError::Cancelled) => Err(DownloadError::Cancelled),
            Err(e) => Err(DownloadError::manifest_fetch(url, e.to_string())),
        }
    }

    /// Resolve the manifest at `request.manifest_url` to its fragment list.
    pub async fn resolve_fragments(
        &self,
        request: &AcquireRequest,
    ) -> Result<Vec<FragmentDescriptor>, DownloadError> {
        let url = request.manifest_url.as_str();
        let cookies = request.cookies.as_ref();
        let manifest = self.fetch_manifest(url, cookies).await?;

        let kind = ManifestKind::from_url(url)
            .or_else(|| ManifestKind::sniff(&manifest))
            .ok_or_else(|| {
                DownloadError::manifest_unsupported(format!(
                    "{url} is neither an HLS playlist nor a DASH manifest"
                ))
            })?;
        debug!(url, kind = kind.as_str(), "Detected manifest type");

        match kind {
            ManifestKind::Dash => {
                let representations = dash::parse_manifest(&manifest);
                let selected = dash::select_representation(&representations, &request.quality)
                    .ok_or_else(|| {
                        DownloadError::manifest_unsupported("DASH manifest has no representations")
                    })?;
                self.events.info(format!(
                    "Selected DASH representation {} ({})",
                    selected.id,
                    selected.mime_type.as_deref().unwrap_or("unknown type")
                ));
                Err(DownloadError::DashNotImplemented {
                    representation: selected.id.clone(),
                })
            }
            ManifestKind::Hls => {
                let (media_url, playlist) = match hls::classify(&manifest) {
                    HlsPlaylist::Master(master) => {
                        let variant =
                            hls::select_variant(&master, &request.quality).ok_or_else(|| {
                                DownloadError::manifest_unsupported(
                                    "master playlist has no playable variants",
                                )
                            })?;
                        let media_url = hls::variant_url(url, variant);
                        self.events.info(format!(
                            "Selected variant {} ({} bps) for quality '{}'",
                            variant.uri, variant.bandwidth, request.quality
                        ));
                        let playlist = self.fetch_manifest(&media_url, cookies).await?;
                        (media_url, playlist)
                    }
                    HlsPlaylist::Media => (url.to_string(), manifest),
                };

                let fragments =
                    hls::parse_media_playlist(&playlist, Some(&base_url_of(&media_url)));
                if fragments.is_empty() {
                    return Err(DownloadError::NoFragments {
                        location: media_url,
                    });
                }
                Ok(fragments)
            }
        }
    }

    /// Number of leading fragments a saved record lets this run keep.
    async fn resume_mark(&self, dir: &Path, total: usize) -> usize {
        match ProgressRecord::load(dir).await {
            Ok(Some(record)) if record.fragments_total == total => {
                record.fragments_downloaded.min(total)
            }
            Ok(Some(record)) => {
                self.events.warn(format!(
                    "Ignoring saved progress for {} fragments, playlist now has {total}",
                    record.fragments_total
                ));
                0
            }
            Ok(None) => 0,
            Err(e) => {
                self.events
                    .warn(format!("Ignoring unreadable saved progress: {e}"));
                0
            }
        }
    }

    /// Download every fragment of the manifest, in playlist order.
    ///
    /// Fragment files from an earlier run that the resume record does not
    /// cover are removed first. `progress.json` is rewritten after each
    /// attempted fragment. A fragment that cannot be retrieved leaves no file
    /// and is counted as failed; the run only fails on cancellation or when
    /// `max_failed_ratio` is exceeded.
    pub async fn acquire(
        &self,
        request: &AcquireRequest,
    ) -> Result<AcquisitionReport, DownloadError> {
        let dir = request.output_dir.as_path();
        tokio::fs::create_dir_all(dir).await?;

        let mut fragments = self.resolve_fragments(request).await?;
        if let Some(max) = request.max_fragments {
            fragments.truncate(max);
        }
        let total = fragments.len();
        self.events.info(format!("Found {total} fragments to download"));

        let resume_mark = if request.resume {
            self.resume_mark(dir, total).await
        } else {
            0
        };
        if resume_mark == 0 {
            ProgressRecord::remove(dir).await?;
        }
        let pruned = prune_fragments(dir, resume_mark as u64).await?;
        if pruned > 0 {
            self.events.info(format!(
                "Removed {pruned} fragment files left by an earlier run"
            ));
        }

        let cookies = request.cookies.as_ref();
        let mut mark = resume_mark;
        let mut failed = 0;
        let mut skipped = 0;
        let mut bytes_written = 0u64;

        for (index, fragment) in fragments.iter().enumerate() {
            if self.token.is_cancelled() {
                info!(index, total, "Acquisition cancelled");
                return Err(DownloadError::Cancelled);
            }

            let path = dir.join(fragment_file_name(index));

            if index < resume_mark {
                let existing = tokio::fs::metadata(&path)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                if existing > 0 {
                    skipped += 1;
                    self.events.fragment_completed(index, total, existing);
                    continue;
                }
            }

            let bytes = self
                .fetcher
                .fetch_fragment(&fragment.url, &path, cookies)
                .await?;
            if bytes == 0 {
                failed += 1;
                self.events.warn(format!(
                    "Fragment {index} (sequence {}) could not be downloaded",
                    fragment.sequence
                ));
            } else {
                bytes_written += bytes;
            }

            mark = mark.max(index + 1);
            ProgressRecord {
                fragments_total: total,
                fragments_downloaded: mark,
                last_fragment: fragment.sequence,
                last_url: fragment.url.clone(),
            }
            .store(dir)
            .await?;

            self.events.fragment_completed(index, total, bytes);
        }

        if let Some(max_ratio) = self.fetcher.config().max_failed_ratio
            && total > 0
            && failed as f64 / total as f64 > max_ratio
        {
            return Err(DownloadError::TooManyFailedFragments {
                failed,
                total,
                max_ratio,
            });
        }

        info!(
            total,
            failed,
            skipped,
            bytes = bytes_written,
            dir = %dir.display(),
            "Acquisition finished"
        );

        Ok(AcquisitionReport {
            fragments_total: total,
            fragments_downloaded: total,
            fragments_failed: failed,
            fragments_skipped: skipped,
            bytes_written,
            fragments_dir: dir.to_path_buf(),
        })
    }
}
