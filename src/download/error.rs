use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryAction;

/// Typed download errors enabling retry classification.
///
/// `is_retryable()` separates transient failures (server errors, rate limits,
/// dropped connections, timeouts) from permanent ones (missing media,
/// content that fails verification, local disk errors).
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} downloading {uri}")]
    HttpStatus {
        status: u16,
        uri: String,
        /// Parsed `Retry-After` header, if the server sent one.
        retry_after: Option<Duration>,
    },

    #[error("Transfer of {uri} failed after {bytes_written} bytes: {reason}")]
    Http {
        uri: String,
        reason: String,
        bytes_written: u64,
    },

    #[error("Download of {uri} timed out after {}s", .after.as_secs())]
    Timeout { uri: String, after: Duration },

    #[error("Checksum mismatch for {uri}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        uri: String,
        expected: String,
        actual: String,
    },

    #[error("Size mismatch for {uri}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        uri: String,
        expected: u64,
        actual: u64,
    },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("Download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            DownloadError::Http { .. } | DownloadError::Timeout { .. } => true,
            DownloadError::ChecksumMismatch { .. }
            | DownloadError::SizeMismatch { .. }
            | DownloadError::Disk(_)
            | DownloadError::Cancelled => false,
        }
    }

    /// Classification for the retry loop, carrying any server wait hint.
    pub fn retry_action(&self) -> RetryAction {
        match self {
            DownloadError::HttpStatus {
                retry_after: Some(hint),
                ..
            } if self.is_retryable() => RetryAction::RetryAfter(*hint),
            _ if self.is_retryable() => RetryAction::Retry,
            _ => RetryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> DownloadError {
        DownloadError::HttpStatus {
            status,
            uri: "x".into(),
            retry_after: None,
        }
    }

    #[test]
    fn test_client_errors_not_retryable() {
        for code in [400, 401, 403, 404, 410] {
            assert!(!status(code).is_retryable(), "{code}");
        }
    }

    #[test]
    fn test_rate_limit_and_server_errors_retryable() {
        for code in [429, 500, 502, 503] {
            assert!(status(code).is_retryable(), "{code}");
        }
    }

    #[test]
    fn test_retry_after_hint_is_carried() {
        let limited = DownloadError::HttpStatus {
            status: 429,
            uri: "x".into(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(limited.retry_action(), RetryAction::RetryAfter(Duration::from_secs(30)));
        assert_eq!(status(503).retry_action(), RetryAction::Retry);
        assert_eq!(status(404).retry_action(), RetryAction::Abort);

        let gone = DownloadError::HttpStatus {
            status: 404,
            uri: "x".into(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(gone.retry_action(), RetryAction::Abort);
    }

    #[test]
    fn test_transport_and_timeout_retryable() {
        assert!(DownloadError::Http {
            uri: "x".into(),
            reason: "connection reset".into(),
            bytes_written: 10,
        }
        .is_retryable());
        assert!(DownloadError::Timeout {
            uri: "x".into(),
            after: Duration::from_secs(1),
        }
        .is_retryable());
    }

    #[test]
    fn test_verification_failures_are_permanent() {
        assert!(!DownloadError::ChecksumMismatch {
            uri: "x".into(),
            expected: "a".into(),
            actual: "b".into(),
        }
        .is_retryable());
        assert!(!DownloadError::SizeMismatch {
            uri: "x".into(),
            expected: 1,
            actual: 2,
        }
        .is_retryable());
    }

    #[test]
    fn test_disk_and_cancel_not_retryable() {
        assert!(!DownloadError::Disk(std::io::Error::other("disk full")).is_retryable());
        assert!(!DownloadError::Cancelled.is_retryable());
    }

    #[test]
    fn test_timeout_message() {
        let e = DownloadError::Timeout {
            uri: "u".into(),
            after: Duration::from_secs(1200),
        };
        assert_eq!(e.to_string(), "Download of u timed out after 1200s");
    }
}
