use std::path::PathBuf;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("giving up on {url} after {attempts} attempts: {reason}")]
    FetchExhausted {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("failed to download manifest {url}: {reason}")]
    ManifestFetch { url: String, reason: String },

    #[error("unsupported manifest: {reason}")]
    ManifestUnsupported { reason: String },

    #[error("no fragments found in {location}")]
    NoFragments { location: String },

    #[error("DASH segment enumeration is not implemented (selected representation `{representation}`)")]
    DashNotImplemented { representation: String },

    #[error("{failed} of {total} fragments failed (allowed ratio {max_ratio})")]
    TooManyFailedFragments {
        failed: usize,
        total: usize,
        max_ratio: f64,
    },

    #[error("fragments directory does not exist: {}", path.display())]
    FragmentsDirMissing { path: PathBuf },

    #[error("media tool `{tool}` is not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("media tool `{tool}` exited with {code:?}: {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn manifest_fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ManifestFetch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn manifest_unsupported(reason: impl Into<String>) -> Self {
        Self::ManifestUnsupported {
            reason: reason.into(),
        }
    }

    pub fn tool_unavailable(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolUnavailable {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether another attempt at the same request could succeed.
    ///
    /// Every HTTP status is treated as transient: live origins routinely return
    /// 403/404 for a fragment that appears a moment later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::HttpStatus { .. } | Self::Io { .. } => true,
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::FetchExhausted { .. }
            | Self::ManifestFetch { .. }
            | Self::ManifestUnsupported { .. }
            | Self::NoFragments { .. }
            | Self::DashNotImplemented { .. }
            | Self::TooManyFailedFragments { .. }
            | Self::FragmentsDirMissing { .. }
            | Self::ToolUnavailable { .. }
            | Self::ToolFailed { .. }
            | Self::Json { .. }
            | Self::Configuration { .. } => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_is_retryable_for_client_and_server_errors() {
        assert!(DownloadError::http_status(StatusCode::NOT_FOUND, "http://a/b.ts").is_retryable());
        assert!(
            DownloadError::http_status(StatusCode::BAD_GATEWAY, "http://a/b.ts").is_retryable()
        );
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(!DownloadError::Cancelled.is_retryable());
        assert!(!DownloadError::manifest_unsupported("unknown").is_retryable());
        assert!(!DownloadError::tool_unavailable("ffmpeg", "not found").is_retryable());
    }

    #[test]
    fn io_errors_convert_and_retry() {
        let err: DownloadError = std::io::Error::other("disk hiccup").into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("disk hiccup"));
    }
}
