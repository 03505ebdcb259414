//! Permission-cache strategies.
//!
//! Two interchangeable implementations of [`PermissionCache`]:
//!
//! - [`TablePermissionCache`]: rows in the persistent store, each with its own
//!   expiry; expired rows are misses until the maintenance loop purges them
//! - [`BackendPermissionCache`]: keys in a [`CacheBackend`](bitperm_cache::CacheBackend),
//!   expired by the backend itself

mod backend;
mod table;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bitperm_storage::{RoleId, SpaceId, UserId};
use serde::Serialize;

use crate::bits::SpacePermissions;
use crate::error::RbacResult;

pub use backend::BackendPermissionCache;
pub use table::TablePermissionCache;

/// Default lifetime of a cached mask.
pub const DEFAULT_PERMISSION_TTL: Duration = Duration::from_secs(3600);

/// Hit and miss counters of a strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PermissionCacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl PermissionCacheStats {
    /// Fraction of lookups served from cache, `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct HitCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HitCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PermissionCacheStats {
        PermissionCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Per-user, per-space cache of effective bitmasks.
#[async_trait]
pub trait PermissionCache: Send + Sync {
    /// Cached mask for `(user, space)`; `None` on a miss or an expired entry.
    ///
    /// # Errors
    ///
    /// `CacheUnavailable` when the underlying cache is down.
    async fn get(&self, user_id: UserId, space_id: SpaceId) -> RbacResult<Option<u64>>;

    /// Stores one mask per space with a fresh expiry.
    async fn set(&self, user_id: UserId, permissions: &SpacePermissions) -> RbacResult<()>;

    /// Drops every cached mask of a user.
    async fn invalidate_user(&self, user_id: UserId) -> RbacResult<()>;

    /// Drops the cached masks of every holder of a role.
    ///
    /// Holders are passed in because a deleted role no longer lists them.
    async fn invalidate_by_role(&self, role_id: RoleId, user_ids: &[UserId]) -> RbacResult<()> {
        for &user_id in user_ids {
            self.invalidate_user(user_id).await?;
        }
        tracing::debug!(role_id = %role_id, users = user_ids.len(), "invalidated role holders");
        Ok(())
    }

    /// Every unexpired mask of a user, or `None` if nothing is cached.
    async fn get_all_for_user(&self, user_id: UserId) -> RbacResult<Option<SpacePermissions>>;

    /// Removes expired entries, returning how many were removed.
    async fn purge_expired(&self) -> RbacResult<u64>;

    fn stats(&self) -> PermissionCacheStats;

    fn ttl(&self) -> Duration;

    fn name(&self) -> &'static str;
}
