//! Error taxonomy of the permission engine.

use bitperm_cache::CacheError;
use bitperm_storage::{SpaceId, StorageError};
use serde::Serialize;

/// Broad class of an [`RbacError`], switched on once at the protocol boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Capacity,
    InvariantViolation,
    CacheUnavailable,
    Persistence,
}

/// Errors returned by the registry and the evaluator.
#[derive(Debug, thiserror::Error)]
pub enum RbacError {
    /// A space, permission, role or assignment does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate name, code or role assignment.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The space already holds the maximum number of permissions.
    #[error("Space {space_id} is full: at most {max} permissions fit in one space")]
    Capacity { space_id: SpaceId, max: usize },

    /// Attempt to delete a system role.
    #[error("Cannot delete system role '{name}'")]
    SystemRole { name: String },

    /// The cache backend is down. Callers treat this as a miss.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(#[from] CacheError),

    /// The persistent store failed. The outcome of the operation is unknown.
    #[error("Persistence error: {0}")]
    Persistence(#[source] StorageError),
}

impl RbacError {
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// The category this error belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Conflict(_) => ErrorCategory::Conflict,
            Self::Capacity { .. } => ErrorCategory::Capacity,
            Self::SystemRole { .. } => ErrorCategory::InvariantViolation,
            Self::CacheUnavailable(_) => ErrorCategory::CacheUnavailable,
            Self::Persistence(_) => ErrorCategory::Persistence,
        }
    }

    /// HTTP status code equivalent for an upward protocol layer.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self.category() {
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::Capacity => 422,
            ErrorCategory::InvariantViolation => 403,
            ErrorCategory::CacheUnavailable => 503,
            ErrorCategory::Persistence => 500,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    pub fn is_cache_unavailable(&self) -> bool {
        matches!(self, Self::CacheUnavailable(_))
    }
}

impl From<StorageError> for RbacError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => Self::NotFound(what),
            StorageError::Conflict(message) => Self::Conflict(message),
            other => Self::Persistence(other),
        }
    }
}

/// Result type for the permission engine.
pub type RbacResult<T> = Result<T, RbacError>;
