//! External media tool used for lossless reassembly.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::ToolConfig;
use crate::error::DownloadError;
use crate::events::{EventSink, MergeStage};
use crate::ffmpeg_parser::{
    is_progress_line, parse_duration_header, parse_time_field, progress_percent,
};

const STDERR_TAIL_LINES: usize = 20;

/// Where a running tool reports progress and learns it should stop.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub events: EventSink,
    pub token: CancellationToken,
}

/// Stream-copy operations the reassembly engine needs from a media tool.
#[async_trait]
pub trait MediaTool: Send + Sync {
    fn name(&self) -> &str;

    /// Probe that the tool can be run at all.
    async fn version(&self) -> Result<String, DownloadError>;

    /// Join the files listed in a concat list into `output`.
    async fn concat(
        &self,
        list_file: &Path,
        output: &Path,
        ctx: &ToolContext,
    ) -> Result<(), DownloadError>;

    async fn write_metadata(
        &self,
        input: &Path,
        output: &Path,
        metadata: &BTreeMap<String, String>,
        ctx: &ToolContext,
    ) -> Result<(), DownloadError>;

    /// Embed `thumbnail` as the attached picture of `output`.
    async fn attach_thumbnail(
        &self,
        input: &Path,
        thumbnail: &Path,
        output: &Path,
        ctx: &ToolContext,
    ) -> Result<(), DownloadError>;
}

/// [`MediaTool`] backed by an ffmpeg binary.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTool {
    config: ToolConfig,
}

fn common_args() -> Vec<String> {
    ["-hide_banner", "-nostats", "-progress", "pipe:2"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl FfmpegTool {
    pub fn new() -> Self {
        Self::with_config(ToolConfig::default())
    }

    pub fn with_config(config: ToolConfig) -> Self {
        Self { config }
    }

    pub fn concat_args(list_file: &Path, output: &Path) -> Vec<String> {
        let mut args = common_args();
        args.extend(["-f", "concat", "-safe", "0", "-i"].map(String::from));
        args.push(path_arg(list_file));
        args.extend(["-c".to_string(), "copy".to_string()]);
        args.push("-y".to_string());
        args.push(path_arg(output));
        args
    }

    /// Entries with an empty value are left out.
    pub fn metadata_args(
        input: &Path,
        output: &Path,
        metadata: &BTreeMap<String, String>,
    ) -> Vec<String> {
        let mut args = common_args();
        args.extend(["-i".to_string(), path_arg(input)]);
        args.extend(["-c".to_string(), "copy".to_string()]);
        for (key, value) in metadata.iter().filter(|(_, v)| !v.is_empty()) {
            args.extend(["-metadata".to_string(), format!("{key}={value}")]);
        }
        args.push("-y".to_string());
        args.push(path_arg(output));
        args
    }

    pub fn thumbnail_args(input: &Path, thumbnail: &Path, output: &Path) -> Vec<String> {
        let mut args = common_args();
        args.extend(["-i".to_string(), path_arg(input)]);
        args.extend(["-i".to_string(), path_arg(thumbnail)]);
        args.extend(["-map", "0", "-map", "1", "-c", "copy"].map(String::from));
        args.extend(["-disposition:v:1".to_string(), "attached_pic".to_string()]);
        args.push("-y".to_string());
        args.push(path_arg(output));
        args
    }

    fn tool_name(&self) -> String {
        self.config.binary_path.display().to_string()
    }

    fn spawn_error(&self, e: std::io::Error) -> DownloadError {
        let reason = if e.kind() == std::io::ErrorKind::NotFound {
            "executable not found".to_string()
        } else {
            e.to_string()
        };
        DownloadError::tool_unavailable(self.tool_name(), reason)
    }

    async fn run(
        &self,
        stage: MergeStage,
        args: Vec<String>,
        ctx: &ToolContext,
    ) -> Result<(), DownloadError> {
        debug!(stage = %stage, ?args, "Running ffmpeg");

        let mut child = process_utils::tokio_command(&self.config.binary_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stderr = child.stderr.take().ok_or_else(|| {
            DownloadError::tool_unavailable(self.tool_name(), "failed to capture stderr")
        })?;
        let mut lines = BufReader::new(stderr).lines();
        let mut duration: Option<f64> = None;
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        loop {
            tokio::select! {
                _ = ctx.token.cancelled() => {
                    warn!(stage = %stage, "Stopping ffmpeg on cancellation");
                    let outcome = process_utils::stop_gracefully(
                        &mut child,
                        b"q",
                        self.config.stop_grace_period,
                    )
                    .await?;
                    debug!(?outcome, "ffmpeg stopped");
                    return Err(DownloadError::Cancelled);
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if is_progress_line(&line) {
                            if let Some(position) = parse_time_field(&line)
                                && let Some(total) = duration
                                && let Some(percent) = progress_percent(position, total)
                            {
                                ctx.events.merge_progress(stage, percent);
                            }
                            continue;
                        }

                        trace!(stage = %stage, "ffmpeg: {line}");
                        if duration.is_none() {
                            duration = parse_duration_header(&line);
                        }
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(stage = %stage, error = %e, "Failed to read ffmpeg output");
                        break;
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = ctx.token.cancelled() => {
                process_utils::stop_gracefully(&mut child, b"q", self.config.stop_grace_period)
                    .await?;
                return Err(DownloadError::Cancelled);
            }
            status = child.wait() => status?,
        };

        if status.success() {
            ctx.events.merge_progress(stage, 100.0);
            Ok(())
        } else {
            Err(DownloadError::ToolFailed {
                tool: self.tool_name(),
                code: status.code(),
                stderr: Vec::from(tail).join("\n"),
            })
        }
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn version(&self) -> Result<String, DownloadError> {
        let output = process_utils::tokio_command(&self.config.binary_path)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(DownloadError::tool_unavailable(
                self.tool_name(),
                format!("version probe exited with {:?}", output.status.code()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }

    async fn concat(
        &self,
        list_file: &Path,
        output: &Path,
        ctx: &ToolContext,
    ) -> Result<(), DownloadError> {
        self.run(MergeStage::Concat, Self::concat_args(list_file, output), ctx)
            .await
    }

    async fn write_metadata(
        &self,
        input: &Path,
        output: &Path,
        metadata: &BTreeMap<String, String>,
        ctx: &ToolContext,
    ) -> Result<(), DownloadError> {
        self.run(
            MergeStage::Metadata,
            Self::metadata_args(input, output, metadata),
            ctx,
        )
        .await
    }

    async fn attach_thumbnail(
        &self,
        input: &Path,
        thumbnail: &Path,
        output: &Path,
        ctx: &ToolContext,
    ) -> Result<(), DownloadError> {
        self.run(
            MergeStage::Thumbnail,
            Self::thumbnail_args(input, thumbnail, output),
            ctx,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn concat_uses_stream_copy_with_unsafe_paths_allowed() {
        let args = FfmpegTool::concat_args(Path::new("/w/filelist.txt"), Path::new("/o/temp_a.mp4"));
        let tail: Vec<&str> = args[4..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "-f", "concat", "-safe", "0", "-i", "/w/filelist.txt", "-c", "copy", "-y",
                "/o/temp_a.mp4"
            ]
        );
        assert_eq!(&args[..4], ["-hide_banner", "-nostats", "-progress", "pipe:2"]);
    }

    #[test]
    fn metadata_skips_empty_values() {
        let mut metadata = BTreeMap::new();
        metadata.insert("title".to_string(), "Live".to_string());
        metadata.insert("artist".to_string(), String::new());
        metadata.insert("comment".to_string(), "partial download (cancelled)".to_string());

        let args =
            FfmpegTool::metadata_args(Path::new("in.mp4"), Path::new("meta_a.mp4"), &metadata);
        let tail: Vec<&str> = args[4..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "-i",
                "in.mp4",
                "-c",
                "copy",
                "-metadata",
                "comment=partial download (cancelled)",
                "-metadata",
                "title=Live",
                "-y",
                "meta_a.mp4"
            ]
        );
    }

    #[test]
    fn thumbnail_maps_picture_as_attachment() {
        let args = FfmpegTool::thumbnail_args(
            Path::new("meta_a.mp4"),
            Path::new("cover.jpg"),
            Path::new("a.mp4"),
        );
        let tail: Vec<&str> = args[4..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "-i",
                "meta_a.mp4",
                "-i",
                "cover.jpg",
                "-map",
                "0",
                "-map",
                "1",
                "-c",
                "copy",
                "-disposition:v:1",
                "attached_pic",
                "-y",
                "a.mp4"
            ]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let tool = FfmpegTool::with_config(ToolConfig::for_binary(PathBuf::from(
            "/definitely/not/here/ffmpeg",
        )));
        let err = tool.version().await.unwrap_err();
        assert!(matches!(err, DownloadError::ToolUnavailable { .. }));
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use crate::events::SessionEvent;
        use std::os::unix::fs::PermissionsExt;
        use std::sync::OnceLock;
        use std::time::Duration;
        use tokio::sync::mpsc;

        const SUCCEEDS: &str = "#!/bin/sh\n\
            echo '  Duration: 00:00:10.00, start: 0.000000, bitrate: 1 kb/s' >&2\n\
            echo 'out_time=00:00:05.000000' >&2\n\
            echo 'progress=end' >&2\n\
            for arg in \"$@\"; do last=\"$arg\"; done\n\
            : > \"$last\"\n\
            exit 0\n";

        const FAILS: &str = "#!/bin/sh\n\
            echo 'Input #0, concat, from list' >&2\n\
            echo 'boom: invalid data found' >&2\n\
            exit 3\n";

        const WAITS_FOR_QUIT: &str = "#!/bin/sh\n\
            read answer\n\
            exit 0\n";

        /// Scripts are written once, before any of them is executed, so no
        /// child inherits a script that is still open for writing.
        fn scripts() -> &'static Path {
            static DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
            DIR.get_or_init(|| {
                let dir = tempfile::tempdir().unwrap();
                for (name, body) in [
                    ("succeeds", SUCCEEDS),
                    ("fails", FAILS),
                    ("waits", WAITS_FOR_QUIT),
                ] {
                    let path = dir.path().join(name);
                    std::fs::write(&path, body).unwrap();
                    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                        .unwrap();
                }
                dir
            })
            .path()
        }

        fn tool(script: &str) -> FfmpegTool {
            FfmpegTool::with_config(ToolConfig {
                binary_path: scripts().join(script),
                stop_grace_period: Duration::from_millis(500),
            })
        }

        #[tokio::test]
        async fn progress_is_reported_and_output_written() {
            let work = tempfile::tempdir().unwrap();
            let output = work.path().join("temp_out.mp4");
            let (tx, mut rx) = mpsc::unbounded_channel();
            let ctx = ToolContext {
                events: EventSink::new(tx),
                token: CancellationToken::new(),
            };

            tool("succeeds")
                .concat(&work.path().join("filelist.txt"), &output, &ctx)
                .await
                .unwrap();
            assert!(output.exists());

            let mut percents = Vec::new();
            while let Ok(event) = rx.try_recv() {
                if let SessionEvent::MergeProgress { stage, percent } = event {
                    assert_eq!(stage, MergeStage::Concat);
                    percents.push(percent);
                }
            }
            assert_eq!(percents, vec![50.0, 100.0]);
        }

        #[tokio::test]
        async fn non_zero_exit_carries_stderr_tail() {
            let work = tempfile::tempdir().unwrap();
            let err = tool("fails")
                .concat(
                    &work.path().join("filelist.txt"),
                    &work.path().join("out.mp4"),
                    &ToolContext::default(),
                )
                .await
                .unwrap_err();
            match err {
                DownloadError::ToolFailed { code, stderr, .. } => {
                    assert_eq!(code, Some(3));
                    assert!(stderr.contains("boom: invalid data found"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn cancellation_asks_tool_to_quit() {
            let work = tempfile::tempdir().unwrap();
            let ctx = ToolContext::default();
            let canceller = ctx.token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                canceller.cancel();
            });

            let started = std::time::Instant::now();
            let err = tool("waits")
                .concat(
                    &work.path().join("filelist.txt"),
                    &work.path().join("out.mp4"),
                    &ctx,
                )
                .await
                .unwrap_err();
            assert!(err.is_cancelled());
            assert!(started.elapsed() < Duration::from_secs(5));
        }
    }
}
