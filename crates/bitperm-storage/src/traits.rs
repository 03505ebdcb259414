//! Persistent storage contract.
//!
//! One trait per table. Implementations are provided in separate crates:
//!
//! - `bitperm-db-memory` - in-process tables
//! - `bitperm-db-postgres` - PostgreSQL

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::StorageResult;
use crate::model::{
    NewPermission, NewRole, NewSpace, Permission, PermissionCacheEntry, PermissionDetail,
    PermissionId, PermissionUpdate, Role, RoleId, RolePermission, RoleUpdate, Space, SpaceId,
    SpaceWithCount, UserId, UserRole,
};

/// Storage for permission spaces.
#[async_trait]
pub trait SpaceStorage: Send + Sync {
    /// Creates a space.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a space with the same name exists.
    async fn create(&self, space: &NewSpace) -> StorageResult<Space>;

    async fn find_by_id(&self, id: SpaceId) -> StorageResult<Option<Space>>;

    async fn find_by_name(&self, name: &str) -> StorageResult<Option<Space>>;

    /// Lists every space with its live permission count, ordered by id.
    async fn list(&self) -> StorageResult<Vec<SpaceWithCount>>;
}

/// Storage for permissions.
///
/// Soft-deleted permissions are hidden from lookups and listings but still
/// count for [`max_position`](Self::max_position) and code uniqueness, so a
/// bit is never handed out twice.
#[async_trait]
pub trait PermissionStorage: Send + Sync {
    /// Creates a permission with a caller-allocated position.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the code exists or the position is taken in the space.
    async fn create(&self, permission: &NewPermission) -> StorageResult<Permission>;

    async fn find_by_id(&self, id: PermissionId) -> StorageResult<Option<Permission>>;

    /// Finds a live permission by code.
    async fn find_by_code(&self, code: &str) -> StorageResult<Option<Permission>>;

    /// Returns `true` if any permission, including soft-deleted ones, uses `code`.
    async fn code_exists(&self, code: &str) -> StorageResult<bool>;

    /// Highest position ever allocated in the space, or `None` for an empty space.
    async fn max_position(&self, space_id: SpaceId) -> StorageResult<Option<u8>>;

    /// Lists live permissions, optionally restricted to one space, ordered by
    /// space then position.
    async fn list(&self, space_id: Option<SpaceId>) -> StorageResult<Vec<PermissionDetail>>;

    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the permission is absent or soft-deleted.
    async fn update(&self, id: PermissionId, update: &PermissionUpdate)
    -> StorageResult<Permission>;

    /// Marks a permission deleted. Its position stays allocated.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the permission is absent or already deleted.
    async fn soft_delete(&self, id: PermissionId) -> StorageResult<()>;
}

/// Storage for roles.
#[async_trait]
pub trait RoleStorage: Send + Sync {
    /// # Errors
    ///
    /// Returns `Conflict` if the name is taken.
    async fn create(&self, role: &NewRole) -> StorageResult<Role>;

    async fn find_by_id(&self, id: RoleId) -> StorageResult<Option<Role>>;

    async fn find_by_name(&self, name: &str) -> StorageResult<Option<Role>>;

    async fn list(&self) -> StorageResult<Vec<Role>>;

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown role and `Conflict` when renaming onto
    /// an existing name.
    async fn update(&self, id: RoleId, update: &RoleUpdate) -> StorageResult<Role>;

    /// Deletes the role row. Links are removed separately by the caller.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown role.
    async fn delete(&self, id: RoleId) -> StorageResult<()>;
}

/// Storage for user to role assignments.
#[async_trait]
pub trait UserRoleStorage: Send + Sync {
    /// # Errors
    ///
    /// Returns `Conflict` if the user already holds the role.
    async fn assign(&self, user_id: UserId, role_id: RoleId) -> StorageResult<UserRole>;

    /// # Errors
    ///
    /// Returns `NotFound` if the user does not hold the role.
    async fn remove(&self, user_id: UserId, role_id: RoleId) -> StorageResult<()>;

    async fn exists(&self, user_id: UserId, role_id: RoleId) -> StorageResult<bool>;

    /// Roles held by a user, ordered by role id.
    async fn roles_for_user(&self, user_id: UserId) -> StorageResult<Vec<Role>>;

    /// Users holding a role.
    async fn user_ids_for_role(&self, role_id: RoleId) -> StorageResult<Vec<UserId>>;

    /// Removes every assignment of a role, returning how many were removed.
    async fn delete_for_role(&self, role_id: RoleId) -> StorageResult<u64>;
}

/// Storage for role to permission links.
#[async_trait]
pub trait RolePermissionStorage: Send + Sync {
    /// Links a permission to a role, copying its space and value.
    ///
    /// Returns `false` if the link already existed.
    async fn add(&self, role_id: RoleId, permission: &Permission) -> StorageResult<bool>;

    /// Returns `false` if there was no such link.
    async fn remove(&self, role_id: RoleId, permission_id: PermissionId) -> StorageResult<bool>;

    async fn links_for_role(&self, role_id: RoleId) -> StorageResult<Vec<RolePermission>>;

    /// Live permissions linked to a role, ordered by space then position.
    async fn permissions_for_role(&self, role_id: RoleId) -> StorageResult<Vec<PermissionDetail>>;

    /// Removes every link of a role, returning how many were removed.
    async fn delete_for_role(&self, role_id: RoleId) -> StorageResult<u64>;
}

/// Storage for per-user permission cache rows.
#[async_trait]
pub trait PermissionCacheStorage: Send + Sync {
    /// Inserts or replaces the row for `(entry.user_id, entry.space_id)`.
    async fn upsert(&self, entry: &PermissionCacheEntry) -> StorageResult<()>;

    /// Returns the row regardless of its expiry.
    async fn find(
        &self,
        user_id: UserId,
        space_id: SpaceId,
    ) -> StorageResult<Option<PermissionCacheEntry>>;

    async fn find_for_user(&self, user_id: UserId) -> StorageResult<Vec<PermissionCacheEntry>>;

    async fn delete_for_user(&self, user_id: UserId) -> StorageResult<u64>;

    /// Removes rows whose `expires_at` is at or before `now`.
    async fn delete_expired(&self, now: OffsetDateTime) -> StorageResult<u64>;
}

/// Every storage the permission engine needs, behind trait objects.
#[derive(Clone)]
pub struct StorageSet {
    pub spaces: Arc<dyn SpaceStorage>,
    pub permissions: Arc<dyn PermissionStorage>,
    pub roles: Arc<dyn RoleStorage>,
    pub user_roles: Arc<dyn UserRoleStorage>,
    pub role_permissions: Arc<dyn RolePermissionStorage>,
    pub permission_cache: Arc<dyn PermissionCacheStorage>,
}

impl StorageSet {
    /// Builds a set where one value implements every trait.
    pub fn from_shared<S>(storage: Arc<S>) -> Self
    where
        S: SpaceStorage
            + PermissionStorage
            + RoleStorage
            + UserRoleStorage
            + RolePermissionStorage
            + PermissionCacheStorage
            + 'static,
    {
        Self {
            spaces: storage.clone(),
            permissions: storage.clone(),
            roles: storage.clone(),
            user_roles: storage.clone(),
            role_permissions: storage.clone(),
            permission_cache: storage,
        }
    }
}
