use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng as _;
use tokio_util::sync::CancellationToken;

/// Longest server-requested wait honored before a retry.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    /// Retry, waiting at least this long (a `Retry-After` hint).
    RetryAfter(Duration),
    Abort,
}

/// Parse a `Retry-After` header value: delay-seconds or an HTTP date.
/// Dates in the past yield zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some((at.with_timezone(&Utc) - now).to_std().unwrap_or(Duration::ZERO))
}

/// Server wait hint from a response's `Retry-After` header.
pub fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()))
}

/// Exponential backoff configuration with jitter so that several workers
/// failing on the same outage don't hammer the album service in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Total number of attempts, counting the first one.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Pure backoff formula for a given retry (0-indexed) and a jitter value.
    ///
    /// `min(base * 2^retry, max) + min(jitter, base)`
    pub fn delay_with_jitter(&self, retry: u32, jitter_ms: u64) -> Duration {
        let exp_delay = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp_delay.min(self.max_delay_ms);
        Duration::from_millis(capped.saturating_add(jitter_ms.min(self.base_delay_ms)))
    }

    /// Delay for a given retry with a random jitter in `0..base_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let jitter = if self.base_delay_ms > 0 {
            rand::thread_rng().gen_range(0..self.base_delay_ms)
        } else {
            0
        };
        self.delay_with_jitter(retry, jitter)
    }

    /// The backoff delay, raised to a server hint capped at
    /// [`MAX_RETRY_AFTER`].
    pub fn delay_honoring(backoff: Duration, hint: Duration) -> Duration {
        backoff.max(hint.min(MAX_RETRY_AFTER))
    }
}

/// Retry an async operation with exponential backoff and jitter.
///
/// - `config`: retry configuration
/// - `cancel`: stops waiting between attempts once cancelled
/// - `classifier`: inspects an error and returns `Retry`, `RetryAfter` or `Abort`
/// - `operation`: the async closure to retry
///
/// Returns the first `Ok` result, or the last error if retries are exhausted,
/// the classifier returns `Abort`, or cancellation interrupts a backoff sleep.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    classifier: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.total_attempts();
    let mut attempt = 0;

    loop {
        let err = match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => e,
        };
        attempt += 1;
        let hint = match classifier(&err) {
            RetryAction::Abort => return Err(err),
            RetryAction::Retry => None,
            RetryAction::RetryAfter(hint) => Some(hint),
        };
        if attempt >= total_attempts {
            return Err(err);
        }

        let backoff = config.delay_for_retry(attempt - 1);
        let delay = hint.map_or(backoff, |hint| RetryConfig::delay_honoring(backoff, hint));
        tracing::warn!(
            "Retryable error (attempt {}/{}), retrying in {}ms: {}",
            attempt,
            total_attempts,
            delay.as_millis(),
            err
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(err),
        }
    }
}
