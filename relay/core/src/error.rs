//! Error types for the relay core
//!
//! Two layers:
//!
//! - [`AttemptError`]: the outcome of one failed outbound call. Carries the
//!   HTTP status when the upstream answered, so the retry policy and the
//!   fallback breaker can inspect it.
//! - [`RelayError`]: what a whole dispatch can fail with. Only these reach the
//!   inbound boundary, where they collapse to a generic internal error.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single outbound call to one host
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AttemptError {
    /// Upstream answered with a non-success status
    #[error("upstream returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body excerpt
        message: String,
    },

    /// Connection-level failure (DNS, refused, reset, undecodable body)
    #[error("transport error: {0}")]
    Transport(String),

    /// No response within the host's timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The attempt could not be built (e.g. fallback active without a key)
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AttemptError {
    /// HTTP status, when the upstream produced one
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this is the rate-limit status
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }
}

/// Terminal failure of a dispatch
#[derive(Debug, Error)]
pub enum RelayError {
    /// The key pool is empty
    #[error("No API keys available")]
    NoCredentials,

    /// The key pool has keys but none are active
    #[error("No active API keys available")]
    NoActiveCredentials,

    /// The host pool returned nothing to race against
    #[error("No hosts available")]
    NoHosts,

    /// A hosts or keys file could not be read
    #[error("Failed to read {path}: {source}")]
    ReadError {
        /// File that was attempted
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// A hosts or keys file is not valid JSON of the expected shape
    #[error("Failed to parse {path}: {source}")]
    ParseError {
        /// File that was attempted
        path: PathBuf,
        /// Underlying JSON error
        source: serde_json::Error,
    },

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Every attempt in every round failed before the deadline
    #[error("All hosts failed: {attempts} attempts over {elapsed:?}")]
    AllHostsFailed {
        /// Number of attempts that finished with an error
        attempts: usize,
        /// Time spent racing
        elapsed: Duration,
    },

    /// The caller cancelled before a winner was chosen
    #[error("Request cancelled")]
    Cancelled,

    /// The winning stream broke mid-flight
    #[error("Upstream stream error: {0}")]
    Stream(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_error_status() {
        let err = AttemptError::Status {
            status: 503,
            message: "busy".to_string(),
        };
        assert_eq!(err.status(), Some(503));
        assert!(!err.is_rate_limited());

        assert_eq!(AttemptError::Transport("reset".into()).status(), None);
        assert_eq!(
            AttemptError::Timeout(Duration::from_secs(30)).status(),
            None
        );
    }

    #[test]
    fn test_rate_limited() {
        let err = AttemptError::Status {
            status: 429,
            message: String::new(),
        };
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_relay_error_messages_do_not_name_hosts() {
        let err = RelayError::AllHostsFailed {
            attempts: 12,
            elapsed: Duration::from_secs(120),
        };
        assert!(err.to_string().starts_with("All hosts failed"));
        assert_eq!(RelayError::NoCredentials.to_string(), "No API keys available");
    }
}
