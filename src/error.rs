//! Error types for state synchronization operations.
//!
//! Most failure modes in this crate are recovered locally (malformed
//! fragments decode to the empty state, failed fetches roll back the query).
//! `StateError` covers the cases that are surfaced to callers.

use thiserror::Error;

/// Errors that can occur while manipulating application state.
#[derive(Debug, Error)]
pub enum StateError {
    /// Key path is empty or contains an invalid segment.
    #[error("invalid key path: {0}")]
    InvalidPath(String),

    /// A history fragment could not be decoded.
    #[error("malformed fragment: {0}")]
    MalformedFragment(String),

    /// A filter value could not be parsed.
    #[error("invalid filter {name}: {reason}")]
    InvalidFilter { name: String, reason: String },

    /// A collection fetch failed (network or HTTP level).
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Configuration value out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

impl StateError {
    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StateError::FetchFailed(_))
    }

    pub(crate) fn invalid_filter(name: &str, reason: impl Into<String>) -> Self {
        StateError::InvalidFilter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StateError::InvalidPath("f..box".to_string());
        assert!(err.to_string().contains("invalid key path"));
        assert!(err.to_string().contains("f..box"));
    }

    #[test]
    fn test_invalid_filter_display() {
        let err = StateError::invalid_filter("box", "expected 4 coordinates");
        assert_eq!(
            err.to_string(),
            "invalid filter box: expected 4 coordinates"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(StateError::FetchFailed("timeout".to_string()).is_retryable());
        assert!(!StateError::InvalidPath("".to_string()).is_retryable());
        assert!(!StateError::MalformedFragment("x".to_string()).is_retryable());
    }

    #[test]
    fn test_from_serde_json() {
        let err: StateError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, StateError::SerializationError(_)));
    }
}
