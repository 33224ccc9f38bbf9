//! Helpers shared by unit tests: a local HTTP origin and a fake media tool.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;

use crate::config::DownloaderConfig;
use crate::error::DownloadError;
use crate::events::MergeStage;
use crate::retry::RetryPolicy;
use crate::tool::{MediaTool, ToolContext};

/// Serve `app` on an ephemeral port and return `http://127.0.0.1:<port>`.
pub(crate) async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Config that retries quickly so failure paths finish in milliseconds.
pub(crate) fn fast_config(max_attempts: u32) -> DownloaderConfig {
    DownloaderConfig {
        timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            exponential: false,
            jitter: false,
        },
        ..DownloaderConfig::default()
    }
}

/// A live origin with a media playlist at `/live/index.m3u8` and fragments
/// at `/live/seg{n}.ts` whose body is `payload-{n}`. Fragments listed in
/// `missing` answer 404.
#[derive(Clone)]
pub(crate) struct FakeOrigin {
    pub playlist: Arc<String>,
    pub missing: Arc<Vec<usize>>,
    pub fragment_hits: Arc<AtomicUsize>,
}

impl FakeOrigin {
    pub fn with_fragments(count: usize, media_sequence: u64) -> Self {
        let mut playlist = format!(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:{media_sequence}\n"
        );
        for n in 0..count {
            playlist.push_str(&format!("#EXTINF:2.000,\nseg{n}.ts\n"));
        }
        Self {
            playlist: Arc::new(playlist),
            missing: Arc::new(Vec::new()),
            fragment_hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn missing(mut self, missing: Vec<usize>) -> Self {
        self.missing = Arc::new(missing);
        self
    }

    pub fn hits(&self) -> usize {
        self.fragment_hits.load(Ordering::SeqCst)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/live/index.m3u8", get(playlist_handler))
            .route("/live/{segment}", get(fragment_handler))
            .with_state(self.clone())
    }
}

async fn playlist_handler(State(origin): State<FakeOrigin>) -> impl IntoResponse {
    origin.playlist.as_str().to_owned()
}

async fn fragment_handler(
    State(origin): State<FakeOrigin>,
    UrlPath(segment): UrlPath<String>,
) -> impl IntoResponse {
    origin.fragment_hits.fetch_add(1, Ordering::SeqCst);
    let index = segment
        .strip_prefix("seg")
        .and_then(|s| s.strip_suffix(".ts"))
        .and_then(|n| n.parse::<usize>().ok());
    match index {
        Some(n) if !origin.missing.contains(&n) => {
            (StatusCode::OK, format!("payload-{n}")).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// In-process [`MediaTool`]: concat joins the listed files byte for byte,
/// metadata appends `{key=value}` markers and the thumbnail stage appends
/// `{thumb}`.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeTool {
    pub unavailable: bool,
    pub fail_concat: bool,
    pub fail_metadata: bool,
    pub fail_thumbnail: bool,
    pub calls: Arc<Mutex<Vec<MergeStage>>>,
}

impl FakeTool {
    fn record(&self, stage: MergeStage, fail: bool) -> Result<(), DownloadError> {
        self.calls.lock().unwrap().push(stage);
        if fail {
            return Err(DownloadError::ToolFailed {
                tool: "fake".to_string(),
                code: Some(1),
                stderr: format!("{stage} failed"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTool for FakeTool {
    fn name(&self) -> &str {
        "fake"
    }

    async fn version(&self) -> Result<String, DownloadError> {
        if self.unavailable {
            return Err(DownloadError::tool_unavailable("fake", "not installed"));
        }
        Ok("fake 1.0".to_string())
    }

    async fn concat(
        &self,
        list_file: &Path,
        output: &Path,
        _ctx: &ToolContext,
    ) -> Result<(), DownloadError> {
        self.record(MergeStage::Concat, self.fail_concat)?;
        let list = tokio::fs::read_to_string(list_file).await?;
        let mut merged = Vec::new();
        for line in list.lines() {
            let quoted = line
                .strip_prefix("file '")
                .and_then(|rest| rest.strip_suffix('\''))
                .unwrap();
            let path = quoted.replace("'\\''", "'");
            merged.extend(tokio::fs::read(path).await?);
        }
        tokio::fs::write(output, merged).await?;
        Ok(())
    }

    async fn write_metadata(
        &self,
        input: &Path,
        output: &Path,
        metadata: &BTreeMap<String, String>,
        _ctx: &ToolContext,
    ) -> Result<(), DownloadError> {
        self.record(MergeStage::Metadata, self.fail_metadata)?;
        let mut data = tokio::fs::read(input).await?;
        for (key, value) in metadata.iter().filter(|(_, v)| !v.is_empty()) {
            data.extend(format!("{{{key}={value}}}").into_bytes());
        }
        tokio::fs::write(output, data).await?;
        Ok(())
    }

    async fn attach_thumbnail(
        &self,
        input: &Path,
        _thumbnail: &Path,
        output: &Path,
        _ctx: &ToolContext,
    ) -> Result<(), DownloadError> {
        self.record(MergeStage::Thumbnail, self.fail_thumbnail)?;
        let mut data = tokio::fs::read(input).await?;
        data.extend(b"{thumb}");
        tokio::fs::write(output, data).await?;
        Ok(())
    }
}
