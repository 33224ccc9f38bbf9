use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";

/// HTTP options for manifest and fragment downloads.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for a single HTTP request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    pub follow_redirects: bool,

    pub user_agent: String,

    /// Headers sent with every request
    pub headers: HeaderMap,

    pub retry: RetryPolicy,

    /// Fraction of zero-byte fragments tolerated before acquisition is
    /// reported as failed. `None` accepts any number of failures.
    pub max_failed_ratio: Option<f64>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            retry: RetryPolicy::default(),
            max_failed_ratio: None,
        }
    }
}

impl DownloaderConfig {
    /// Merge `extra` over the default header set; entries in `extra` win.
    pub fn with_headers(mut self, extra: HeaderMap) -> Self {
        for (name, value) in extra.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("*/*"),
        );

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        default_headers
    }
}

/// External media tool settings.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub binary_path: PathBuf,
    /// How long a tool gets to finalize after being asked to quit.
    pub stop_grace_period: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from(DEFAULT_FFMPEG_PATH),
            stop_grace_period: Duration::from_secs(3),
        }
    }
}

impl ToolConfig {
    pub fn for_binary(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            ..Self::default()
        }
    }
}

/// Options for turning a fragment directory into the final file.
///
/// The engine only ever reads these; recovery derives its own copy when it
/// needs to add a comment.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Leave fragment files and `progress.json` in place after a merge.
    pub keep_fragments: bool,
    /// Container metadata. Entries with an empty value are skipped.
    pub metadata: BTreeMap<String, String>,
    /// Cover image embedded as an attached picture, when the file exists.
    pub thumbnail_path: Option<PathBuf>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            keep_fragments: false,
            metadata: BTreeMap::new(),
            thumbnail_path: None,
        }
    }
}

impl MergeOptions {
    pub(crate) fn has_metadata(&self) -> bool {
        self.metadata.values().any(|v| !v.is_empty())
    }
}
