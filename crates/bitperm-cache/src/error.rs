//! Cache error types.

use std::time::Duration;

/// Errors returned by cache backends.
///
/// A missing key is not an error: `get` returns `Ok(None)` for absent or
/// expired entries.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backend cannot be reached (connection refused, pool exhausted, ping failed).
    #[error("Cache unavailable: {message}")]
    Unavailable {
        /// Description of why the backend is unavailable.
        message: String,
    },

    /// The operation did not complete within its deadline.
    #[error("Cache operation timed out after {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The backend has been closed.
    #[error("Cache backend closed")]
    Closed,

    /// The backend rejected the command.
    #[error("Cache backend error: {message}")]
    Backend {
        /// Description of the backend error.
        message: String,
    },

    /// A stored value could not be encoded or decoded.
    #[error("Cache serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },
}

impl CacheError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` if the backend should be considered down.
    ///
    /// Timeouts and closed backends count as unavailable.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Timeout { .. } | Self::Closed
        )
    }

    /// Returns `true` if this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
