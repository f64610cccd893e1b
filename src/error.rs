//! Error types for the Pacer engine.

use thiserror::Error;

use crate::retry::RetryHistoryEntry;

/// Main error type for Pacer operations.
#[derive(Error, Debug)]
pub enum PacerError {
    /// Invalid limiter, retry or engine parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// Admission was denied and the engine is not configured to wait it out
    #[error("Rate limit exceeded for limiter {limiter_id}, retry after {retry_after_ms}ms")]
    RateLimited {
        limiter_id: String,
        retry_after_ms: u64,
    },

    /// The wrapped operation failed; carries the last underlying error
    #[error("Operation failed after {attempts} attempt(s): {source:#}")]
    Operation {
        attempts: u32,
        history: Vec<RetryHistoryEntry>,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration source could not be loaded or deserialized
    #[error("Configuration load error: {0}")]
    Load(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PacerError {
    /// Whether this error is an admission denial rather than a failure.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PacerError::RateLimited { .. })
    }

    /// Retry history attached to an operation failure, if any.
    pub fn history(&self) -> Option<&[RetryHistoryEntry]> {
        match self {
            PacerError::Operation { history, .. } => Some(history),
            _ => None,
        }
    }
}

/// Result type alias for Pacer operations.
pub type Result<T> = std::result::Result<T, PacerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_display() {
        let err = PacerError::RateLimited {
            limiter_id: "search".to_string(),
            retry_after_ms: 250,
        };
        assert!(err.is_rate_limited());
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded for limiter search, retry after 250ms"
        );
    }

    #[test]
    fn test_operation_error_keeps_source_chain() {
        let source = anyhow::anyhow!("connection reset").context("fetching page");
        let err = PacerError::Operation {
            attempts: 3,
            history: Vec::new(),
            source,
        };
        assert!(!err.is_rate_limited());
        assert_eq!(err.history().map(|h| h.len()), Some(0));
        assert_eq!(
            err.to_string(),
            "Operation failed after 3 attempt(s): fetching page: connection reset"
        );
    }
}
