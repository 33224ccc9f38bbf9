//! HTTP retrieval of manifests and fragments.

use std::path::Path;
use std::sync::OnceLock;

use bytes::Bytes;
use reqwest::Client;
use reqwest::header::COOKIE;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::config::DownloaderConfig;
use crate::cookies::CookieJar;
use crate::error::DownloadError;
use crate::layout::PART_SUFFIX;
use crate::retry::{RetryAction, retry_with_backoff};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate may have installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Downloads URLs with the configured retry policy.
///
/// Every attempt uses a freshly built client with no idle connection pool, so
/// a connection wedged by a flaky CDN edge is never reused.
#[derive(Debug, Clone)]
pub struct FragmentFetcher {
    config: DownloaderConfig,
    token: CancellationToken,
}

impl FragmentFetcher {
    pub fn new(config: DownloaderConfig, token: CancellationToken) -> Self {
        Self { config, token }
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    fn build_client(&self) -> Result<Client, DownloadError> {
        install_rustls_provider();

        let mut builder = Client::builder()
            .user_agent(self.config.user_agent.as_str())
            .default_headers(self.config.headers.clone())
            .connect_timeout(self.config.connect_timeout)
            .pool_max_idle_per_host(0);

        if self.config.timeout > std::time::Duration::ZERO {
            builder = builder.timeout(self.config.timeout);
        }
        if !self.config.follow_redirects {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }

        Ok(builder.build()?)
    }

    async fn attempt(&self, url: &Url, cookie: Option<&str>) -> Result<Bytes, DownloadError> {
        let client = self.build_client()?;
        let mut request = client.get(url.clone());
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(DownloadError::http_status(status, url.as_str()));
            }
            Ok(response.bytes().await?)
        };

        tokio::select! {
            _ = self.token.cancelled() => Err(DownloadError::Cancelled),
            result = exchange => result,
        }
    }

    /// Download `url` into memory.
    ///
    /// Transient failures (network errors and any non-2xx status) are retried
    /// per the policy; once attempts run out the error is
    /// [`DownloadError::FetchExhausted`].
    pub async fn fetch(
        &self,
        url: &str,
        cookies: Option<&CookieJar>,
    ) -> Result<Bytes, DownloadError> {
        let parsed = Url::parse(url).map_err(|e| DownloadError::invalid_url(url, e.to_string()))?;
        let cookie = cookies.and_then(|jar| jar.header_value_for(&parsed));
        let policy = &self.config.retry;

        let result = retry_with_backoff(policy, &self.token, |attempt| {
            let parsed = &parsed;
            let cookie = cookie.as_deref();
            async move {
                trace!(url = %parsed, attempt = attempt + 1, "Requesting");
                match self.attempt(parsed, cookie).await {
                    Ok(data) => RetryAction::Success(data),
                    Err(DownloadError::Cancelled) => RetryAction::Fail(DownloadError::Cancelled),
                    Err(e) if e.is_retryable() => RetryAction::Retry(e),
                    Err(e) => RetryAction::Fail(e),
                }
            }
        })
        .await;

        match result {
            Ok(data) => Ok(data),
            Err(e) if e.is_retryable() => {
                error!(
                    url,
                    attempts = policy.max_attempts,
                    error = %e,
                    "Download failed after all attempts"
                );
                Err(DownloadError::FetchExhausted {
                    url: url.to_string(),
                    attempts: policy.max_attempts.max(1),
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Download `url` into `path` and return the number of bytes written.
    ///
    /// A fragment that cannot be retrieved or stored is reported as 0 bytes
    /// so the caller can carry on with the next one. Only cancellation is
    /// returned as an error.
    pub async fn fetch_fragment(
        &self,
        url: &str,
        path: &Path,
        cookies: Option<&CookieJar>,
    ) -> Result<u64, DownloadError> {
        let data = match self.fetch(url, cookies).await {
            Ok(data) => data,
            Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
            Err(e) => {
                error!(url, error = %e, "Failed to download fragment");
                return Ok(0);
            }
        };

        match write_atomically(path, &data).await {
            Ok(()) => {
                debug!(url, path = %path.display(), bytes = data.len(), "Fragment stored");
                Ok(data.len() as u64)
            }
            Err(e) => {
                error!(url, path = %path.display(), error = %e, "Failed to write fragment");
                Ok(0)
            }
        }
    }
}

async fn write_atomically(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(PART_SUFFIX);
    let result = match tokio::fs::write(&tmp, data).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if result.is_err()
        && let Err(e) = tokio::fs::remove_file(&tmp).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove partial fragment");
    }
    result
}
