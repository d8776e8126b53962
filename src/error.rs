//! Error types for speechsync
//!
//! Two taxonomies: read-path [`FetchError`]s are recorded in cache entries and
//! shown to views, write-path [`DispatchError`]s are only seen through the
//! dispatcher's error policy. [`SpeechSyncError`] covers everything else.

use crate::retry::{RetryDecision, RetryableError};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for speechsync operations
pub type Result<T> = std::result::Result<T, SpeechSyncError>;

/// Failure of a cache fetch
///
/// Cloned into every snapshot that observes it, so it carries messages
/// rather than the underlying error values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection, DNS or timeout failures
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response
    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body was not the expected JSON
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Map a reqwest error onto the read-path taxonomy
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

impl RetryableError for FetchError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            FetchError::Network(_) => RetryDecision::Retry,
            FetchError::Status { status, .. } => match status {
                429 => RetryDecision::RetryAfter(Duration::from_secs(60)),
                500..=599 => RetryDecision::Retry,
                _ => RetryDecision::NoRetry,
            },
            FetchError::Parse(_) => RetryDecision::NoRetry,
            FetchError::Other(_) => RetryDecision::NoRetry,
        }
    }
}

/// Failure of a fire-and-forget request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request rejected with status {0}")]
    Status(u16),

    #[error("Failed to encode request body: {0}")]
    Encode(String),
}

/// Comprehensive error type for speechsync operations
#[derive(Error, Debug)]
pub enum SpeechSyncError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration values
    #[error("Invalid configuration: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Validation(Vec<crate::config::ValidationError>),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Read-path errors surfaced to callers that await a fetch directly
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Write-path errors surfaced when the dispatcher is awaited directly
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Wire type errors
    #[error("API error: {0}")]
    Api(#[from] speech_api::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_retry_decisions() {
        assert_eq!(
            FetchError::Network("refused".into()).retry_decision(),
            RetryDecision::Retry
        );
        assert_eq!(
            FetchError::Status {
                status: 503,
                message: "unavailable".into()
            }
            .retry_decision(),
            RetryDecision::Retry
        );
        assert_eq!(
            FetchError::Status {
                status: 429,
                message: "slow down".into()
            }
            .retry_decision(),
            RetryDecision::RetryAfter(Duration::from_secs(60))
        );
        assert_eq!(
            FetchError::Status {
                status: 404,
                message: "missing".into()
            }
            .retry_decision(),
            RetryDecision::NoRetry
        );
        assert_eq!(
            FetchError::Parse("eof".into()).retry_decision(),
            RetryDecision::NoRetry
        );
    }

    #[test]
    fn test_json_error_is_parse() {
        let err = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        assert!(matches!(FetchError::from(err), FetchError::Parse(_)));
    }

    #[test]
    fn test_error_display() {
        let err = SpeechSyncError::from(FetchError::Status {
            status: 500,
            message: "boom".into(),
        });
        assert_eq!(err.to_string(), "Request failed with status 500: boom");
    }
}
