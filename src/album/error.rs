use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryAction;

/// Why the album service refused us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The album is password protected and no password was supplied.
    Missing,
    /// A password was supplied but the service did not accept it.
    Rejected,
    /// The service answered 401/403.
    Forbidden,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::Missing => write!(f, "album is password protected, no password supplied"),
            AuthFailure::Rejected => write!(f, "password was rejected"),
            AuthFailure::Forbidden => write!(f, "access forbidden"),
        }
    }
}

/// Errors from listing an album.
///
/// Only [`AlbumError::TransientNetwork`] and [`AlbumError::RateLimited`] are
/// worth retrying; the rest abort the whole run.
#[derive(Debug, Error)]
pub enum AlbumError {
    #[error("Authentication failed: {0}")]
    Authentication(AuthFailure),

    #[error("Album not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Rate limited by {url}, retry after {}s", .retry_after.as_secs())]
    RateLimited { url: String, retry_after: Duration },

    #[error("Unexpected response from album service: {0}")]
    Protocol(String),
}

impl AlbumError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AlbumError::TransientNetwork(_) | AlbumError::RateLimited { .. }
        )
    }

    /// Classification for the retry loop, carrying any server wait hint.
    pub fn retry_action(&self) -> RetryAction {
        match self {
            AlbumError::RateLimited { retry_after, .. } => RetryAction::RetryAfter(*retry_after),
            AlbumError::TransientNetwork(_) => RetryAction::Retry,
            _ => RetryAction::Abort,
        }
    }

    /// Like [`AlbumError::from_status`], keeping a `Retry-After` hint sent
    /// with a retryable status.
    pub fn from_response(status: u16, url: &str, retry_after: Option<Duration>) -> Self {
        match (status, retry_after) {
            (429 | 500..=599, Some(retry_after)) => AlbumError::RateLimited {
                url: url.to_string(),
                retry_after,
            },
            _ => AlbumError::from_status(status, url),
        }
    }

    /// Classify a non-success HTTP status returned for an album page.
    pub fn from_status(status: u16, url: &str) -> Self {
        match status {
            401 | 403 => AlbumError::Authentication(AuthFailure::Forbidden),
            404 | 410 => AlbumError::NotFound(url.to_string()),
            429 | 500..=599 => AlbumError::TransientNetwork(format!("HTTP {status} from {url}")),
            _ => AlbumError::Protocol(format!("HTTP {status} from {url}")),
        }
    }
}

impl From<reqwest::Error> for AlbumError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            let url = e.url().map(|u| u.as_str()).unwrap_or("");
            return AlbumError::from_status(status.as_u16(), url);
        }
        if e.is_decode() {
            return AlbumError::Protocol(e.to_string());
        }
        AlbumError::TransientNetwork(e.to_string())
    }
}

impl From<serde_json::Error> for AlbumError {
    fn from(e: serde_json::Error) -> Self {
        AlbumError::Protocol(format!("malformed media JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            AlbumError::from_status(401, "u"),
            AlbumError::Authentication(AuthFailure::Forbidden)
        ));
        assert!(matches!(
            AlbumError::from_status(404, "u"),
            AlbumError::NotFound(_)
        ));
        assert!(matches!(
            AlbumError::from_status(410, "u"),
            AlbumError::NotFound(_)
        ));
        assert!(AlbumError::from_status(429, "u").is_retryable());
        assert!(AlbumError::from_status(502, "u").is_retryable());
        assert!(matches!(
            AlbumError::from_status(418, "u"),
            AlbumError::Protocol(_)
        ));
    }

    #[test]
    fn test_retry_after_hint_kept_for_retryable_status() {
        let hint = Some(Duration::from_secs(30));
        let err = AlbumError::from_response(429, "u", hint);
        assert!(matches!(err, AlbumError::RateLimited { .. }));
        assert_eq!(err.retry_action(), RetryAction::RetryAfter(Duration::from_secs(30)));
        assert!(matches!(
            AlbumError::from_response(503, "u", None),
            AlbumError::TransientNetwork(_)
        ));
        assert!(matches!(
            AlbumError::from_response(404, "u", hint),
            AlbumError::NotFound(_)
        ));
        assert_eq!(AlbumError::from_status(502, "u").retry_action(), RetryAction::Retry);
        assert_eq!(AlbumError::Protocol("x".into()).retry_action(), RetryAction::Abort);
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(AlbumError::TransientNetwork("reset".into()).is_retryable());
        assert!(!AlbumError::Protocol("x".into()).is_retryable());
        assert!(!AlbumError::NotFound("x".into()).is_retryable());
        assert!(!AlbumError::Authentication(AuthFailure::Rejected).is_retryable());
    }

    #[test]
    fn test_json_error_is_protocol() {
        let err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        assert!(matches!(AlbumError::from(err), AlbumError::Protocol(_)));
    }
}
