//! PostgreSQL storage backend for BitPerm.
//!
//! Provides persistent storage for:
//!
//! - Permission spaces and bit-packed permissions
//! - Roles, role-permission links and user-role links
//! - Per-user permission cache rows (`user_permission_cache`)
//!
//! The schema is embedded and applied on [`PostgresPermissionStore::connect`]
//! when `run_migrations` is set.
//!
//! # Example
//!
//! ```ignore
//! use bitperm_db_postgres::{PostgresConfig, PostgresPermissionStore};
//!
//! let store = PostgresPermissionStore::connect(&PostgresConfig::new("postgres://localhost/bitperm")).await?;
//! let storage = store.storage_set();
//! ```

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;

mod cache;
mod links;
mod permission;
mod role;
mod space;

use std::sync::Arc;

use bitperm_storage::StorageSet;
use sqlx_postgres::PgPool;

pub use config::{DEFAULT_APPLICATION_NAME, PostgresConfig};
pub use error::{PostgresError, Result};

/// PostgreSQL implementation of every BitPerm storage trait.
#[derive(Debug, Clone)]
pub struct PostgresPermissionStore {
    pool: Arc<PgPool>,
}

impl PostgresPermissionStore {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Connect, then apply the schema if configured to.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = pool::create_pool(config).await?;
        if config.run_migrations {
            migrations::run(&pool).await?;
        }
        Ok(Self::new(Arc::new(pool)))
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Exposes this store through every storage trait.
    #[must_use]
    pub fn storage_set(self) -> StorageSet {
        StorageSet::from_shared(Arc::new(self))
    }

    /// Close the pool, waiting for connections to be released.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
