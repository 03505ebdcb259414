//! Error types for the PostgreSQL storage backend.

use bitperm_storage::{StorageError, StorageResult};
use sqlx_core::error::Error as SqlxError;

/// Errors raised while setting up the backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(#[from] SqlxError),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, PostgresError>;

impl From<PostgresError> for StorageError {
    fn from(e: PostgresError) -> Self {
        StorageError::database(e.to_string())
    }
}

/// Maps a sqlx error onto the storage taxonomy.
///
/// Unique violations become `Conflict`, foreign key violations `NotFound`.
pub(crate) fn map_db_error(e: SqlxError, what: &str) -> StorageError {
    if let SqlxError::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return StorageError::conflict(format!("{what} already exists"));
        }
        if db_err.is_foreign_key_violation() {
            return StorageError::not_found(format!("{what}: referenced row"));
        }
    }
    if matches!(e, SqlxError::RowNotFound) {
        return StorageError::not_found(what.to_string());
    }
    StorageError::database(e.to_string())
}

/// Shorthand for `map_err(|e| map_db_error(e, what))`.
pub(crate) trait DbResultExt<T> {
    fn db_context(self, what: &str) -> StorageResult<T>;
}

impl<T> DbResultExt<T> for std::result::Result<T, SqlxError> {
    fn db_context(self, what: &str) -> StorageResult<T> {
        self.map_err(|e| map_db_error(e, what))
    }
}
