use std::time::Duration;

use async_trait::async_trait;
use bitperm_cache::DynCacheBackend;
use bitperm_storage::{SpaceId, UserId};

use super::{HitCounters, PermissionCache, PermissionCacheStats};
use crate::bits::SpacePermissions;
use crate::error::{RbacError, RbacResult};

fn user_prefix(user_id: UserId) -> String {
    format!("perm:user:{user_id}:")
}

fn space_key(user_id: UserId, space_id: SpaceId) -> String {
    format!("perm:user:{user_id}:space:{space_id}")
}

fn all_key(user_id: UserId) -> String {
    format!("perm:user:{user_id}:all")
}

/// Cached masks stored as keys in a [`CacheBackend`](bitperm_cache::CacheBackend).
///
/// Layout per user:
///
/// ```text
/// perm:user:{u}:space:{s}  decimal mask
/// perm:user:{u}:all        JSON object {space_id: mask}
/// ```
pub struct BackendPermissionCache {
    backend: DynCacheBackend,
    ttl: Duration,
    counters: HitCounters,
}

impl BackendPermissionCache {
    pub fn new(backend: DynCacheBackend, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            counters: HitCounters::default(),
        }
    }

    /// Reports a cache error as a miss.
    fn miss_with(&self, e: bitperm_cache::CacheError) -> RbacError {
        self.counters.miss();
        RbacError::CacheUnavailable(e)
    }
}

#[async_trait]
impl PermissionCache for BackendPermissionCache {
    async fn get(&self, user_id: UserId, space_id: SpaceId) -> RbacResult<Option<u64>> {
        let key = space_key(user_id, space_id);
        let bytes = self
            .backend
            .get(&key)
            .await
            .map_err(|e| self.miss_with(e))?;

        let mask = bytes.and_then(|bytes| {
            let parsed = std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse::<u64>().ok());
            if parsed.is_none() {
                tracing::warn!(key = %key, "unparseable cached permission mask");
            }
            parsed
        });

        match mask {
            Some(mask) => {
                self.counters.hit();
                Ok(Some(mask))
            }
            None => {
                self.counters.miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, user_id: UserId, permissions: &SpacePermissions) -> RbacResult<()> {
        let ttl = Some(self.ttl);
        for (&space_id, mask) in permissions {
            self.backend
                .set(&space_key(user_id, space_id), mask.to_string().into_bytes(), ttl)
                .await?;
        }

        let all = serde_json::to_vec(permissions).map_err(|e| {
            RbacError::CacheUnavailable(bitperm_cache::CacheError::serialization(e.to_string()))
        })?;
        self.backend.set(&all_key(user_id), all, ttl).await?;
        Ok(())
    }

    async fn invalidate_user(&self, user_id: UserId) -> RbacResult<()> {
        self.backend.delete_by_prefix(&user_prefix(user_id)).await?;
        Ok(())
    }

    async fn get_all_for_user(&self, user_id: UserId) -> RbacResult<Option<SpacePermissions>> {
        let Some(bytes) = self.backend.get(&all_key(user_id)).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<SpacePermissions>(&bytes) {
            Ok(permissions) => Ok(Some(permissions)),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "unparseable cached permission map");
                Ok(None)
            }
        }
    }

    async fn purge_expired(&self) -> RbacResult<u64> {
        Ok(0)
    }

    fn stats(&self) -> PermissionCacheStats {
        self.counters.snapshot()
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn name(&self) -> &'static str {
        "backend"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bitperm_cache::{CacheBackend, MemoryCache};

    use super::*;

    fn cache() -> (Arc<MemoryCache>, BackendPermissionCache) {
        let backend = Arc::new(MemoryCache::new());
        let cache = BackendPermissionCache::new(backend.clone(), Duration::from_secs(60));
        (backend, cache)
    }

    #[tokio::test]
    async fn test_key_layout() {
        let (backend, cache) = cache();
        let permissions = SpacePermissions::from([(SpaceId(2), 5), (SpaceId(9), 1 << 63)]);
        cache.set(UserId(1), &permissions).await.unwrap();

        assert_eq!(
            backend.get("perm:user:1:space:2").await.unwrap(),
            Some(b"5".to_vec())
        );
        assert_eq!(
            backend.get("perm:user:1:space:9").await.unwrap(),
            Some((1u64 << 63).to_string().into_bytes())
        );
        assert!(backend.exists("perm:user:1:all").await.unwrap());

        assert_eq!(cache.get(UserId(1), SpaceId(9)).await.unwrap(), Some(1 << 63));
        assert_eq!(
            cache.get_all_for_user(UserId(1)).await.unwrap(),
            Some(permissions)
        );
    }

    #[tokio::test]
    async fn test_invalidate_user_removes_all_keys() {
        let (backend, cache) = cache();
        let permissions = SpacePermissions::from([(SpaceId(1), 1)]);
        cache.set(UserId(1), &permissions).await.unwrap();
        cache.set(UserId(10), &permissions).await.unwrap();

        cache.invalidate_user(UserId(1)).await.unwrap();

        assert!(!backend.exists("perm:user:1:space:1").await.unwrap());
        assert!(!backend.exists("perm:user:1:all").await.unwrap());
        assert!(backend.exists("perm:user:10:space:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_garbage_value_is_miss() {
        let (backend, cache) = cache();
        backend
            .set("perm:user:1:space:1", b"not-a-number".to_vec(), None)
            .await
            .unwrap();

        assert_eq!(cache.get(UserId(1), SpaceId(1)).await.unwrap(), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_closed_backend_reports_unavailable_and_counts_miss() {
        let (backend, cache) = cache();
        backend.close().await;

        let err = cache.get(UserId(1), SpaceId(1)).await.unwrap_err();
        assert!(err.is_cache_unavailable());
        assert_eq!(cache.stats(), PermissionCacheStats { hits: 0, misses: 1 });
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
    }
}
