//! Permission evaluation.
//!
//! A check resolves the permission code, looks up the user's cached mask for
//! the permission's space and tests the bit. On a miss the user's masks are
//! recomputed from their roles and written back through the cache strategy.

use std::sync::Arc;

use bitperm_storage::{RoleId, StorageSet, UserId};

use crate::bits::{SpacePermissions, aggregate, has_bits};
use crate::cache::{PermissionCache, PermissionCacheStats};
use crate::error::{RbacError, RbacResult};
use crate::locks::UserLocks;

/// Swallows a `CacheUnavailable`, logging it. Other errors pass through.
pub(crate) fn tolerate_unavailable<T: Default>(
    result: RbacResult<T>,
    user_id: UserId,
    action: &'static str,
) -> RbacResult<T> {
    match result {
        Err(RbacError::CacheUnavailable(e)) => {
            tracing::warn!(user_id = %user_id, error = %e, action, "permission cache unavailable");
            Ok(T::default())
        }
        other => other,
    }
}

/// Evaluates permission checks for users.
pub struct PermissionChecker {
    storage: StorageSet,
    cache: Arc<dyn PermissionCache>,
    locks: Arc<UserLocks>,
}

impl PermissionChecker {
    pub fn new(storage: StorageSet, cache: Arc<dyn PermissionCache>, locks: Arc<UserLocks>) -> Self {
        Self {
            storage,
            cache,
            locks,
        }
    }

    /// Recomputes every space mask of a user and stores it in the cache.
    ///
    /// The result does not depend on the order roles are returned in. A user
    /// without roles gets an empty map.
    pub async fn calculate_user_permissions(&self, user_id: UserId) -> RbacResult<SpacePermissions> {
        let _guard = self.locks.lock(user_id).await;

        tolerate_unavailable(self.cache.invalidate_user(user_id).await, user_id, "invalidate")?;

        let roles = self.storage.user_roles.roles_for_user(user_id).await?;
        let mut links = Vec::new();
        for role in &roles {
            links.extend(self.storage.role_permissions.links_for_role(role.id).await?);
        }
        let permissions = aggregate(&links);

        tolerate_unavailable(self.cache.set(user_id, &permissions).await, user_id, "store")?;

        tracing::debug!(
            user_id = %user_id,
            roles = roles.len(),
            spaces = permissions.len(),
            "recomputed user permissions"
        );
        Ok(permissions)
    }

    /// Returns `(granted, cache_hit)` for `code`.
    ///
    /// An unknown or deleted code is never granted.
    pub async fn check_permission_with_cache(
        &self,
        user_id: UserId,
        code: &str,
    ) -> RbacResult<(bool, bool)> {
        let Some(permission) = self.storage.permissions.find_by_code(code).await? else {
            tracing::debug!(user_id = %user_id, code, "check on unknown permission code");
            return Ok((false, false));
        };

        match self.cache.get(user_id, permission.space_id).await {
            Ok(Some(mask)) => return Ok((has_bits(mask, permission.value), true)),
            Ok(None) => {}
            Err(RbacError::CacheUnavailable(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    code,
                    error = %e,
                    "permission cache unavailable, computing from storage"
                );
            }
            Err(e) => return Err(e),
        }

        let permissions = self.calculate_user_permissions(user_id).await?;
        let mask = permissions
            .get(&permission.space_id)
            .copied()
            .unwrap_or_default();
        Ok((has_bits(mask, permission.value), false))
    }

    /// `true` if any of the user's roles grants `code`.
    pub async fn has_permission(&self, user_id: UserId, code: &str) -> RbacResult<bool> {
        let (granted, _) = self.check_permission_with_cache(user_id, code).await?;
        Ok(granted)
    }

    /// Forces a recompute of the user's masks.
    pub async fn refresh_user_cache(&self, user_id: UserId) -> RbacResult<SpacePermissions> {
        self.calculate_user_permissions(user_id).await
    }

    /// Every cached mask of the user, without recomputing.
    pub async fn cached_permissions(&self, user_id: UserId) -> RbacResult<Option<SpacePermissions>> {
        self.cache.get_all_for_user(user_id).await
    }

    pub fn cache_stats(&self) -> PermissionCacheStats {
        self.cache.stats()
    }

    pub async fn invalidate_user_cache(&self, user_id: UserId) -> RbacResult<()> {
        let _guard = self.locks.lock(user_id).await;
        self.cache.invalidate_user(user_id).await
    }

    /// Invalidates every current holder of a role.
    pub async fn invalidate_role_cache(&self, role_id: RoleId) -> RbacResult<()> {
        let user_ids = self.storage.user_roles.user_ids_for_role(role_id).await?;
        let _guards = self.locks.lock_many(&user_ids).await;
        self.cache.invalidate_by_role(role_id, &user_ids).await
    }

    /// Codes of every live permission the user's masks grant, ordered by space
    /// then position.
    pub async fn user_permission_codes(&self, user_id: UserId) -> RbacResult<Vec<String>> {
        let cached = tolerate_unavailable(self.cached_permissions(user_id).await, user_id, "read")?;
        let permissions = match cached {
            Some(permissions) => permissions,
            None => self.calculate_user_permissions(user_id).await?,
        };

        Ok(self
            .storage
            .permissions
            .list(None)
            .await?
            .into_iter()
            .filter(|detail| {
                let permission = &detail.permission;
                permissions
                    .get(&permission.space_id)
                    .is_some_and(|&mask| has_bits(mask, permission.value))
            })
            .map(|detail| detail.permission.code)
            .collect())
    }
}
