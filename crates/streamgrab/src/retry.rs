// Retry-with-delay loop shared by manifest and fragment downloads.
//
// Defaults to a fixed pause between attempts; exponential growth and jitter
// can be switched on per policy.

use crate::error::DownloadError;
use rand::RngExt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between attempts. With `exponential`, the pause before attempt
    /// `n + 1` is `delay * 2^n`.
    pub delay: Duration,
    /// Hard cap on the computed pause.
    pub max_delay: Duration,
    pub exponential: bool,
    /// Adds random jitter of [0, delay/2), never exceeding `max_delay`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            exponential: false,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Compute the pause after a failed attempt (0-indexed).
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = if self.exponential {
            // Checked shift so attempts >= 32 saturate instead of overflowing.
            let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
            self.delay.checked_mul(multiplier).unwrap_or(self.max_delay)
        } else {
            self.delay
        };
        let capped = base.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
pub enum RetryAction<T> {
    Success(T),
    /// Failed, worth another attempt.
    Retry(DownloadError),
    /// Failed, no point trying again.
    Fail(DownloadError),
}

/// Execute an async operation until it succeeds, fails permanently, runs out
/// of attempts, or the token is cancelled.
///
/// The `operation` closure receives the current attempt number (0-indexed).
/// When attempts run out, the last error is returned as-is.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, DownloadError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                if attempt + 1 >= max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, retrying"
                );
                tokio::select! {
                    _ = token.cancelled() => {
                        return Err(DownloadError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        attempt += 1;
    }
}
