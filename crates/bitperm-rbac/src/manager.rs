//! Permission registry.
//!
//! Owns the lifecycle of spaces, permissions, roles and their links. Every
//! mutation that can change a user's effective masks invalidates the affected
//! users' cache entries once it has committed; invalidation failures are
//! logged and never undo the mutation.

use std::collections::BTreeSet;
use std::sync::Arc;

use bitperm_storage::{
    NewPermission, NewRole, NewSpace, Permission, PermissionDetail, PermissionId,
    PermissionUpdate, Role, RoleDetail, RoleId, RoleUpdate, Space, SpaceId, SpaceWithCount,
    StorageSet, UserId, UserRole,
};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::bits::{MAX_PERMISSIONS_PER_SPACE, bit_value, next_position};
use crate::cache::PermissionCache;
use crate::error::{RbacError, RbacResult};
use crate::locks::UserLocks;

/// Input for [`PermissionManager::create_permission`].
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionRequest {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub space_id: SpaceId,
    #[serde(default)]
    pub module: Option<String>,
}

/// Manages spaces, permissions, roles and assignments.
pub struct PermissionManager {
    storage: StorageSet,
    cache: Arc<dyn PermissionCache>,
    locks: Arc<UserLocks>,
    /// Serializes position allocation.
    allocation: Mutex<()>,
}

impl PermissionManager {
    pub fn new(storage: StorageSet, cache: Arc<dyn PermissionCache>, locks: Arc<UserLocks>) -> Self {
        Self {
            storage,
            cache,
            locks,
            allocation: Mutex::new(()),
        }
    }

    // ------------------------------------------------------------------
    // Spaces
    // ------------------------------------------------------------------

    pub async fn create_space(&self, name: &str, description: Option<&str>) -> RbacResult<Space> {
        if self.storage.spaces.find_by_name(name).await?.is_some() {
            return Err(RbacError::conflict(format!("space '{name}' already exists")));
        }

        let space = self
            .storage
            .spaces
            .create(&NewSpace {
                name: name.to_string(),
                description: description.map(str::to_string),
            })
            .await?;

        tracing::info!(space_id = %space.id, name, "created permission space");
        Ok(space)
    }

    pub async fn list_spaces(&self) -> RbacResult<Vec<SpaceWithCount>> {
        Ok(self.storage.spaces.list().await?)
    }

    pub async fn get_space(&self, space_id: SpaceId) -> RbacResult<Space> {
        self.storage
            .spaces
            .find_by_id(space_id)
            .await?
            .ok_or_else(|| RbacError::not_found(format!("space {space_id}")))
    }

    // ------------------------------------------------------------------
    // Permissions
    // ------------------------------------------------------------------

    /// Creates a permission at the next free position of its space.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the space does not exist
    /// - `Conflict` if the code is taken, including by a deleted permission
    /// - `Capacity` if the space already allocated all 64 positions
    pub async fn create_permission(&self, request: PermissionRequest) -> RbacResult<Permission> {
        let _allocation = self.allocation.lock().await;

        let space = self.get_space(request.space_id).await?;

        if self.storage.permissions.code_exists(&request.code).await? {
            return Err(RbacError::conflict(format!(
                "permission code '{}' already exists",
                request.code
            )));
        }

        let max = self.storage.permissions.max_position(space.id).await?;
        let position = next_position(max).ok_or(RbacError::Capacity {
            space_id: space.id,
            max: MAX_PERMISSIONS_PER_SPACE,
        })?;

        let permission = self
            .storage
            .permissions
            .create(&NewPermission {
                code: request.code,
                name: request.name,
                description: request.description,
                space_id: space.id,
                position,
                value: bit_value(position),
                module: request.module,
            })
            .await?;

        tracing::info!(
            permission_id = %permission.id,
            code = %permission.code,
            space = %space.name,
            position,
            "created permission"
        );
        Ok(permission)
    }

    pub async fn update_permission(
        &self,
        permission_id: PermissionId,
        update: &PermissionUpdate,
    ) -> RbacResult<Permission> {
        Ok(self.storage.permissions.update(permission_id, update).await?)
    }

    /// Soft-deletes a permission. Its position is never reused.
    pub async fn delete_permission(&self, permission_id: PermissionId) -> RbacResult<()> {
        self.storage.permissions.soft_delete(permission_id).await?;
        tracing::info!(permission_id = %permission_id, "deleted permission");
        Ok(())
    }

    pub async fn get_permission(&self, permission_id: PermissionId) -> RbacResult<PermissionDetail> {
        let permission = self
            .storage
            .permissions
            .find_by_id(permission_id)
            .await?
            .ok_or_else(|| RbacError::not_found(format!("permission {permission_id}")))?;
        let space = self.get_space(permission.space_id).await?;

        Ok(PermissionDetail {
            permission,
            space_name: space.name,
        })
    }

    pub async fn list_permissions(
        &self,
        space_id: Option<SpaceId>,
    ) -> RbacResult<Vec<PermissionDetail>> {
        Ok(self.storage.permissions.list(space_id).await?)
    }

    async fn resolve_code(&self, code: &str) -> RbacResult<Permission> {
        self.storage
            .permissions
            .find_by_code(code)
            .await?
            .ok_or_else(|| RbacError::not_found(format!("permission '{code}'")))
    }

    async fn resolve_codes(&self, codes: &[String]) -> RbacResult<Vec<Permission>> {
        let mut permissions = Vec::with_capacity(codes.len());
        for code in codes {
            permissions.push(self.resolve_code(code).await?);
        }
        Ok(permissions)
    }

    // ------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------

    /// Creates a role, optionally linked to an initial set of permissions.
    ///
    /// Every code is resolved before anything is written.
    pub async fn create_role(
        &self,
        name: &str,
        description: Option<&str>,
        codes: &[String],
    ) -> RbacResult<Role> {
        let permissions = self.resolve_codes(codes).await?;

        if self.storage.roles.find_by_name(name).await?.is_some() {
            return Err(RbacError::conflict(format!("role '{name}' already exists")));
        }

        let role = self
            .storage
            .roles
            .create(&NewRole {
                name: name.to_string(),
                description: description.map(str::to_string),
                is_system: false,
            })
            .await?;

        for permission in &permissions {
            self.storage.role_permissions.add(role.id, permission).await?;
        }

        tracing::info!(role_id = %role.id, name, permissions = permissions.len(), "created role");
        Ok(role)
    }

    pub async fn update_role(&self, role_id: RoleId, update: &RoleUpdate) -> RbacResult<Role> {
        if let Some(name) = &update.name
            && let Some(existing) = self.storage.roles.find_by_name(name).await?
            && existing.id != role_id
        {
            return Err(RbacError::conflict(format!("role '{name}' already exists")));
        }

        Ok(self.storage.roles.update(role_id, update).await?)
    }

    /// Deletes a role with its links, then invalidates its former holders.
    ///
    /// # Errors
    ///
    /// `SystemRole` for a system role; nothing is changed in that case.
    pub async fn delete_role(&self, role_id: RoleId) -> RbacResult<()> {
        let role = self.find_role(role_id).await?;
        if role.is_system {
            return Err(RbacError::SystemRole { name: role.name });
        }

        // Holders are read after the links are gone: a later assignment grants nothing.
        let links = self.storage.role_permissions.delete_for_role(role_id).await?;
        let holders = self.storage.user_roles.user_ids_for_role(role_id).await?;
        let assignments = self.storage.user_roles.delete_for_role(role_id).await?;
        self.storage.roles.delete(role_id).await?;

        tracing::info!(
            role_id = %role_id,
            name = %role.name,
            links,
            assignments,
            "deleted role"
        );

        self.invalidate_holders(role_id, &holders).await;
        Ok(())
    }

    pub async fn get_role(&self, role_id: RoleId) -> RbacResult<RoleDetail> {
        let role = self.find_role(role_id).await?;
        let permissions = self
            .storage
            .role_permissions
            .permissions_for_role(role_id)
            .await?;
        let permission_codes = permissions
            .iter()
            .map(|detail| detail.permission.code.clone())
            .collect();

        Ok(RoleDetail {
            role,
            permission_codes,
            permissions,
        })
    }

    pub async fn list_roles(&self) -> RbacResult<Vec<Role>> {
        Ok(self.storage.roles.list().await?)
    }

    pub async fn role_permission_codes(&self, role_id: RoleId) -> RbacResult<Vec<String>> {
        self.find_role(role_id).await?;
        Ok(self
            .storage
            .role_permissions
            .permissions_for_role(role_id)
            .await?
            .into_iter()
            .map(|detail| detail.permission.code)
            .collect())
    }

    async fn find_role(&self, role_id: RoleId) -> RbacResult<Role> {
        self.storage
            .roles
            .find_by_id(role_id)
            .await?
            .ok_or_else(|| RbacError::not_found(format!("role {role_id}")))
    }

    // ------------------------------------------------------------------
    // Role permissions
    // ------------------------------------------------------------------

    /// Links a permission to a role. Returns `false` if it was already linked.
    pub async fn add_permission_to_role(&self, role_id: RoleId, code: &str) -> RbacResult<bool> {
        self.find_role(role_id).await?;
        let permission = self.resolve_code(code).await?;

        let added = self.storage.role_permissions.add(role_id, &permission).await?;
        if added {
            tracing::debug!(role_id = %role_id, code, "added permission to role");
            self.invalidate_role(role_id).await;
        }
        Ok(added)
    }

    /// Unlinks a permission from a role. Returns `false` if it was not linked.
    pub async fn remove_permission_from_role(
        &self,
        role_id: RoleId,
        code: &str,
    ) -> RbacResult<bool> {
        self.find_role(role_id).await?;
        let permission = self.resolve_code(code).await?;

        let removed = self
            .storage
            .role_permissions
            .remove(role_id, permission.id)
            .await?;
        if removed {
            tracing::debug!(role_id = %role_id, code, "removed permission from role");
            self.invalidate_role(role_id).await;
        }
        Ok(removed)
    }

    /// Links several permissions, returning how many links were new.
    ///
    /// Every code is resolved before anything is written.
    pub async fn add_permissions_to_role(
        &self,
        role_id: RoleId,
        codes: &[String],
    ) -> RbacResult<usize> {
        self.find_role(role_id).await?;
        let permissions = self.resolve_codes(codes).await?;

        let mut added = 0;
        for permission in &permissions {
            if self.storage.role_permissions.add(role_id, permission).await? {
                added += 1;
            }
        }

        if added > 0 {
            self.invalidate_role(role_id).await;
        }
        Ok(added)
    }

    /// Unlinks several permissions, returning how many links existed.
    pub async fn remove_permissions_from_role(
        &self,
        role_id: RoleId,
        codes: &[String],
    ) -> RbacResult<usize> {
        self.find_role(role_id).await?;
        let permissions = self.resolve_codes(codes).await?;

        let mut removed = 0;
        for permission in &permissions {
            if self
                .storage
                .role_permissions
                .remove(role_id, permission.id)
                .await?
            {
                removed += 1;
            }
        }

        if removed > 0 {
            self.invalidate_role(role_id).await;
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub async fn assign_role_to_user(&self, user_id: UserId, role_id: RoleId) -> RbacResult<UserRole> {
        self.find_role(role_id).await?;

        let assignment = self.storage.user_roles.assign(user_id, role_id).await?;
        tracing::info!(user_id = %user_id, role_id = %role_id, "assigned role");

        self.invalidate_user(user_id).await;
        Ok(assignment)
    }

    pub async fn remove_role_from_user(&self, user_id: UserId, role_id: RoleId) -> RbacResult<()> {
        self.storage.user_roles.remove(user_id, role_id).await?;
        tracing::info!(user_id = %user_id, role_id = %role_id, "removed role");

        self.invalidate_user(user_id).await;
        Ok(())
    }

    pub async fn user_roles(&self, user_id: UserId) -> RbacResult<Vec<Role>> {
        Ok(self.storage.user_roles.roles_for_user(user_id).await?)
    }

    /// Codes of every live permission linked to any of the user's roles, sorted.
    pub async fn user_permission_codes(&self, user_id: UserId) -> RbacResult<Vec<String>> {
        let mut codes = BTreeSet::new();
        for role in self.storage.user_roles.roles_for_user(user_id).await? {
            for detail in self
                .storage
                .role_permissions
                .permissions_for_role(role.id)
                .await?
            {
                codes.insert(detail.permission.code);
            }
        }
        Ok(codes.into_iter().collect())
    }

    /// Drops the user's cached masks. Unlike the invalidation that follows a
    /// mutation, a failure here is returned.
    pub async fn clear_user_cache(&self, user_id: UserId) -> RbacResult<()> {
        let _guard = self.locks.lock(user_id).await;
        self.cache.invalidate_user(user_id).await
    }

    // ------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------

    async fn invalidate_user(&self, user_id: UserId) {
        let _guard = self.locks.lock(user_id).await;
        if let Err(e) = self.cache.invalidate_user(user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "failed to invalidate user permissions");
        }
    }

    async fn invalidate_role(&self, role_id: RoleId) {
        match self.storage.user_roles.user_ids_for_role(role_id).await {
            Ok(holders) => self.invalidate_holders(role_id, &holders).await,
            Err(e) => {
                tracing::warn!(role_id = %role_id, error = %e, "failed to list role holders for invalidation");
            }
        }
    }

    async fn invalidate_holders(&self, role_id: RoleId, user_ids: &[UserId]) {
        if user_ids.is_empty() {
            return;
        }
        let _guards = self.locks.lock_many(user_ids).await;
        if let Err(e) = self.cache.invalidate_by_role(role_id, user_ids).await {
            tracing::warn!(
                role_id = %role_id,
                users = user_ids.len(),
                error = %e,
                "failed to invalidate role holders"
            );
        }
    }
}
