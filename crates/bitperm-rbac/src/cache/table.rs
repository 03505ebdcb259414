use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitperm_storage::{PermissionCacheEntry, PermissionCacheStorage, SpaceId, UserId};
use time::{OffsetDateTime, PrimitiveDateTime};

use super::{HitCounters, PermissionCache, PermissionCacheStats};
use crate::bits::SpacePermissions;
use crate::error::RbacResult;

/// Cached masks stored as `(user, space)` rows in the persistent store.
pub struct TablePermissionCache {
    rows: Arc<dyn PermissionCacheStorage>,
    ttl: Duration,
    counters: HitCounters,
}

impl TablePermissionCache {
    pub fn new(rows: Arc<dyn PermissionCacheStorage>, ttl: Duration) -> Self {
        Self {
            rows,
            ttl,
            counters: HitCounters::default(),
        }
    }

    /// Expiry for a row written at `now`. Saturates at the latest representable
    /// timestamp.
    fn expires_at(&self, now: OffsetDateTime) -> OffsetDateTime {
        time::Duration::try_from(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
    }
}

#[async_trait]
impl PermissionCache for TablePermissionCache {
    async fn get(&self, user_id: UserId, space_id: SpaceId) -> RbacResult<Option<u64>> {
        let now = OffsetDateTime::now_utc();
        match self.rows.find(user_id, space_id).await? {
            Some(entry) if !entry.is_expired(now) => {
                self.counters.hit();
                Ok(Some(entry.permission_value))
            }
            _ => {
                self.counters.miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, user_id: UserId, permissions: &SpacePermissions) -> RbacResult<()> {
        let now = OffsetDateTime::now_utc();
        let expires_at = self.expires_at(now);
        for (&space_id, &permission_value) in permissions {
            self.rows
                .upsert(&PermissionCacheEntry {
                    user_id,
                    space_id,
                    permission_value,
                    expires_at,
                    updated_at: now,
                })
                .await?;
        }
        Ok(())
    }

    async fn invalidate_user(&self, user_id: UserId) -> RbacResult<()> {
        self.rows.delete_for_user(user_id).await?;
        Ok(())
    }

    async fn get_all_for_user(&self, user_id: UserId) -> RbacResult<Option<SpacePermissions>> {
        let now = OffsetDateTime::now_utc();
        let permissions: SpacePermissions = self
            .rows
            .find_for_user(user_id)
            .await?
            .into_iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| (entry.space_id, entry.permission_value))
            .collect();

        if permissions.is_empty() {
            Ok(None)
        } else {
            Ok(Some(permissions))
        }
    }

    async fn purge_expired(&self) -> RbacResult<u64> {
        Ok(self.rows.delete_expired(OffsetDateTime::now_utc()).await?)
    }

    fn stats(&self) -> PermissionCacheStats {
        self.counters.snapshot()
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn name(&self) -> &'static str {
        "table"
    }
}
