//! Unified error taxonomy for the request-orchestration layer.
//!
//! Every component reports failures through [`RequestError`] so that retry
//! classification lives in one place instead of being re-derived per module.
//! A cache miss is not an error; the read path returns `Option` instead.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the request-orchestration layer.
///
/// The enum is `Clone` so a single failure can be fanned out verbatim to
/// every caller attached to a deduplicated in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Missing or invalid backend configuration. Fatal, never retried.
    #[error("invalid configuration for {field}: {message}")]
    Configuration {
        /// Configuration field that failed validation
        field: String,
        /// Human-readable description of the problem
        message: String,
    },

    /// Connection reset, abort, DNS failure, or a 5xx-class response.
    #[error("network error: {message}")]
    Network {
        /// Description of the underlying failure
        message: String,
    },

    /// An attempt exceeded its deadline and was aborted by the transport.
    ///
    /// Classified as network-class for retry purposes, but kept as its own
    /// variant so callers can distinguish a deadline from a caller abort.
    #[error("operation timed out after {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// The backend responded with HTTP 429.
    #[error("rate limited after {attempts} attempt(s)")]
    RateLimited {
        /// Server-suggested cooldown, when the response carried one
        retry_after: Option<Duration>,
        /// Number of attempts made before surfacing
        attempts: u32,
    },

    /// Any 4xx status other than 429. Caller error, never retried.
    #[error("request rejected with status {status}: {message}")]
    Validation {
        /// HTTP status code returned by the backend
        status: u16,
        /// Message attached to the rejection
        message: String,
    },

    /// The caller aborted its wait, or the queue dropped the operation
    /// before it started. Local to the cancelled caller.
    #[error("cancelled: {reason}")]
    Cancelled {
        /// Why the operation was abandoned
        reason: String,
    },
}

impl RequestError {
    /// Create a configuration error.
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a network-class error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Map an HTTP status to the retry taxonomy.
    ///
    /// 429 becomes [`RequestError::RateLimited`], any other 4xx becomes
    /// [`RequestError::Validation`], and everything else (5xx, or statuses
    /// the backend should never emit) is treated as network-class.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => Self::RateLimited {
                retry_after: None,
                attempts: 1,
            },
            400..=499 => Self::Validation {
                status,
                message: message.into(),
            },
            _ => Self::Network {
                message: format!("backend returned status {status}: {}", message.into()),
            },
        }
    }

    /// Whether the transport may retry after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }

    /// Network-class failures trip the coordinator's network-error flag.
    pub fn is_network_class(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    /// Server-suggested cooldown for rate-limited failures.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
