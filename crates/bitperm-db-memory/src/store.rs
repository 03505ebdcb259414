use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use bitperm_storage::{
    NewPermission, NewRole, NewSpace, Permission, PermissionCacheEntry, PermissionCacheStorage,
    PermissionDetail, PermissionId, PermissionStorage, PermissionUpdate, Role, RoleId,
    RolePermission, RolePermissionStorage, RoleStorage, RoleUpdate, Space, SpaceId, SpaceStorage,
    SpaceWithCount, StorageError, StorageResult, StorageSet, UserId, UserRole, UserRoleStorage,
};
use time::OffsetDateTime;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    spaces: BTreeMap<SpaceId, Space>,
    permissions: BTreeMap<PermissionId, Permission>,
    roles: BTreeMap<RoleId, Role>,
    user_roles: BTreeMap<(UserId, RoleId), UserRole>,
    role_permissions: BTreeMap<(RoleId, PermissionId), RolePermission>,
    permission_cache: BTreeMap<(UserId, SpaceId), PermissionCacheEntry>,
}

impl Tables {
    fn detail(&self, permission: &Permission) -> PermissionDetail {
        PermissionDetail {
            space_name: self
                .spaces
                .get(&permission.space_id)
                .map(|space| space.name.clone())
                .unwrap_or_default(),
            permission: permission.clone(),
        }
    }

    fn sorted_details<'a>(
        &self,
        permissions: impl Iterator<Item = &'a Permission>,
    ) -> Vec<PermissionDetail> {
        let mut details: Vec<PermissionDetail> =
            permissions.map(|permission| self.detail(permission)).collect();
        details.sort_by_key(|d| (d.permission.space_id, d.permission.position));
        details
    }
}

/// In-memory implementation of every BitPerm storage trait.
#[derive(Debug)]
pub struct InMemoryPermissionStore {
    tables: RwLock<Tables>,
    id_sequence: AtomicI64,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            id_sequence: AtomicI64::new(1),
        }
    }

    /// Wraps the store in an `Arc` and exposes it through every trait.
    pub fn storage_set(self) -> StorageSet {
        StorageSet::from_shared(Arc::new(self))
    }

    fn next_id(&self) -> i64 {
        self.id_sequence.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for InMemoryPermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Spaces
// =============================================================================

#[async_trait]
impl SpaceStorage for InMemoryPermissionStore {
    async fn create(&self, space: &NewSpace) -> StorageResult<Space> {
        let mut tables = self.tables.write().await;
        if tables.spaces.values().any(|s| s.name == space.name) {
            return Err(StorageError::conflict(format!(
                "space '{}' already exists",
                space.name
            )));
        }

        let now = OffsetDateTime::now_utc();
        let created = Space {
            id: SpaceId(self.next_id()),
            name: space.name.clone(),
            description: space.description.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.spaces.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: SpaceId) -> StorageResult<Option<Space>> {
        Ok(self.tables.read().await.spaces.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> StorageResult<Option<Space>> {
        let tables = self.tables.read().await;
        Ok(tables.spaces.values().find(|s| s.name == name).cloned())
    }

    async fn list(&self) -> StorageResult<Vec<SpaceWithCount>> {
        let tables = self.tables.read().await;
        Ok(tables
            .spaces
            .values()
            .map(|space| SpaceWithCount {
                permission_count: tables
                    .permissions
                    .values()
                    .filter(|p| p.space_id == space.id && !p.is_deleted())
                    .count() as i64,
                space: space.clone(),
            })
            .collect())
    }
}

// =============================================================================
// Permissions
// =============================================================================

#[async_trait]
impl PermissionStorage for InMemoryPermissionStore {
    async fn create(&self, permission: &NewPermission) -> StorageResult<Permission> {
        let mut tables = self.tables.write().await;
        if !tables.spaces.contains_key(&permission.space_id) {
            return Err(StorageError::not_found(format!(
                "space {}",
                permission.space_id
            )));
        }
        if tables.permissions.values().any(|p| p.code == permission.code) {
            return Err(StorageError::conflict(format!(
                "permission code '{}' already exists",
                permission.code
            )));
        }
        if tables
            .permissions
            .values()
            .any(|p| p.space_id == permission.space_id && p.position == permission.position)
        {
            return Err(StorageError::conflict(format!(
                "position {} already allocated in space {}",
                permission.position, permission.space_id
            )));
        }

        let now = OffsetDateTime::now_utc();
        let created = Permission {
            id: PermissionId(self.next_id()),
            code: permission.code.clone(),
            name: permission.name.clone(),
            description: permission.description.clone(),
            space_id: permission.space_id,
            position: permission.position,
            value: permission.value,
            module: permission.module.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        tables.permissions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: PermissionId) -> StorageResult<Option<Permission>> {
        let tables = self.tables.read().await;
        Ok(tables
            .permissions
            .get(&id)
            .filter(|p| !p.is_deleted())
            .cloned())
    }

    async fn find_by_code(&self, code: &str) -> StorageResult<Option<Permission>> {
        let tables = self.tables.read().await;
        Ok(tables
            .permissions
            .values()
            .find(|p| p.code == code && !p.is_deleted())
            .cloned())
    }

    async fn code_exists(&self, code: &str) -> StorageResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.permissions.values().any(|p| p.code == code))
    }

    async fn max_position(&self, space_id: SpaceId) -> StorageResult<Option<u8>> {
        let tables = self.tables.read().await;
        Ok(tables
            .permissions
            .values()
            .filter(|p| p.space_id == space_id)
            .map(|p| p.position)
            .max())
    }

    async fn list(&self, space_id: Option<SpaceId>) -> StorageResult<Vec<PermissionDetail>> {
        let tables = self.tables.read().await;
        Ok(tables.sorted_details(
            tables
                .permissions
                .values()
                .filter(|p| !p.is_deleted())
                .filter(|p| space_id.is_none_or(|id| p.space_id == id)),
        ))
    }

    async fn update(
        &self,
        id: PermissionId,
        update: &PermissionUpdate,
    ) -> StorageResult<Permission> {
        let mut tables = self.tables.write().await;
        let permission = tables
            .permissions
            .get_mut(&id)
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| StorageError::not_found(format!("permission {id}")))?;

        if let Some(name) = &update.name {
            permission.name = name.clone();
        }
        if let Some(description) = &update.description {
            permission.description = Some(description.clone());
        }
        if let Some(is_active) = update.is_active {
            permission.is_active = is_active;
        }
        permission.updated_at = OffsetDateTime::now_utc();
        Ok(permission.clone())
    }

    async fn soft_delete(&self, id: PermissionId) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        let permission = tables
            .permissions
            .get_mut(&id)
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| StorageError::not_found(format!("permission {id}")))?;

        let now = OffsetDateTime::now_utc();
        permission.deleted_at = Some(now);
        permission.is_active = false;
        permission.updated_at = now;
        Ok(())
    }
}

// =============================================================================
// Roles
// =============================================================================

#[async_trait]
impl RoleStorage for InMemoryPermissionStore {
    async fn create(&self, role: &NewRole) -> StorageResult<Role> {
        let mut tables = self.tables.write().await;
        if tables.roles.values().any(|r| r.name == role.name) {
            return Err(StorageError::conflict(format!(
                "role '{}' already exists",
                role.name
            )));
        }

        let now = OffsetDateTime::now_utc();
        let created = Role {
            id: RoleId(self.next_id()),
            name: role.name.clone(),
            description: role.description.clone(),
            is_active: true,
            is_system: role.is_system,
            created_at: now,
            updated_at: now,
        };
        tables.roles.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: RoleId) -> StorageResult<Option<Role>> {
        Ok(self.tables.read().await.roles.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> StorageResult<Option<Role>> {
        let tables = self.tables.read().await;
        Ok(tables.roles.values().find(|r| r.name == name).cloned())
    }

    async fn list(&self) -> StorageResult<Vec<Role>> {
        Ok(self.tables.read().await.roles.values().cloned().collect())
    }

    async fn update(&self, id: RoleId, update: &RoleUpdate) -> StorageResult<Role> {
        let mut tables = self.tables.write().await;
        if let Some(name) = &update.name
            && tables.roles.values().any(|r| r.id != id && &r.name == name)
        {
            return Err(StorageError::conflict(format!("role '{name}' already exists")));
        }

        let role = tables
            .roles
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found(format!("role {id}")))?;
        if let Some(name) = &update.name {
            role.name = name.clone();
        }
        if let Some(description) = &update.description {
            role.description = Some(description.clone());
        }
        if let Some(is_active) = update.is_active {
            role.is_active = is_active;
        }
        role.updated_at = OffsetDateTime::now_utc();
        Ok(role.clone())
    }

    async fn delete(&self, id: RoleId) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .roles
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(format!("role {id}")))
    }
}

// =============================================================================
// User roles
// =============================================================================

#[async_trait]
impl UserRoleStorage for InMemoryPermissionStore {
    async fn assign(&self, user_id: UserId, role_id: RoleId) -> StorageResult<UserRole> {
        let mut tables = self.tables.write().await;
        if !tables.roles.contains_key(&role_id) {
            return Err(StorageError::not_found(format!("role {role_id}")));
        }
        if tables.user_roles.contains_key(&(user_id, role_id)) {
            return Err(StorageError::conflict(format!(
                "user {user_id} already has role {role_id}"
            )));
        }

        let link = UserRole {
            user_id,
            role_id,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.user_roles.insert((user_id, role_id), link.clone());
        Ok(link)
    }

    async fn remove(&self, user_id: UserId, role_id: RoleId) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .user_roles
            .remove(&(user_id, role_id))
            .map(|_| ())
            .ok_or_else(|| {
                StorageError::not_found(format!("user {user_id} does not have role {role_id}"))
            })
    }

    async fn exists(&self, user_id: UserId, role_id: RoleId) -> StorageResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.user_roles.contains_key(&(user_id, role_id)))
    }

    async fn roles_for_user(&self, user_id: UserId) -> StorageResult<Vec<Role>> {
        let tables = self.tables.read().await;
        Ok(tables
            .user_roles
            .range((user_id, RoleId(i64::MIN))..=(user_id, RoleId(i64::MAX)))
            .filter_map(|((_, role_id), _)| tables.roles.get(role_id).cloned())
            .collect())
    }

    async fn user_ids_for_role(&self, role_id: RoleId) -> StorageResult<Vec<UserId>> {
        let tables = self.tables.read().await;
        Ok(tables
            .user_roles
            .keys()
            .filter(|(_, r)| *r == role_id)
            .map(|(u, _)| *u)
            .collect())
    }

    async fn delete_for_role(&self, role_id: RoleId) -> StorageResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.user_roles.len();
        tables.user_roles.retain(|(_, r), _| *r != role_id);
        Ok((before - tables.user_roles.len()) as u64)
    }
}

// =============================================================================
// Role permissions
// =============================================================================

#[async_trait]
impl RolePermissionStorage for InMemoryPermissionStore {
    async fn add(&self, role_id: RoleId, permission: &Permission) -> StorageResult<bool> {
        let mut tables = self.tables.write().await;
        if !tables.roles.contains_key(&role_id) {
            return Err(StorageError::not_found(format!("role {role_id}")));
        }
        let key = (role_id, permission.id);
        if tables.role_permissions.contains_key(&key) {
            return Ok(false);
        }

        tables.role_permissions.insert(
            key,
            RolePermission {
                role_id,
                permission_id: permission.id,
                space_id: permission.space_id,
                value: permission.value,
                created_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(true)
    }

    async fn remove(&self, role_id: RoleId, permission_id: PermissionId) -> StorageResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .role_permissions
            .remove(&(role_id, permission_id))
            .is_some())
    }

    async fn links_for_role(&self, role_id: RoleId) -> StorageResult<Vec<RolePermission>> {
        let tables = self.tables.read().await;
        Ok(tables
            .role_permissions
            .range((role_id, PermissionId(i64::MIN))..=(role_id, PermissionId(i64::MAX)))
            .map(|(_, link)| link.clone())
            .collect())
    }

    async fn permissions_for_role(&self, role_id: RoleId) -> StorageResult<Vec<PermissionDetail>> {
        let tables = self.tables.read().await;
        let permissions = tables
            .role_permissions
            .range((role_id, PermissionId(i64::MIN))..=(role_id, PermissionId(i64::MAX)))
            .filter_map(|((_, permission_id), _)| tables.permissions.get(permission_id))
            .filter(|p| !p.is_deleted());
        Ok(tables.sorted_details(permissions))
    }

    async fn delete_for_role(&self, role_id: RoleId) -> StorageResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.role_permissions.len();
        tables.role_permissions.retain(|(r, _), _| *r != role_id);
        Ok((before - tables.role_permissions.len()) as u64)
    }
}

// =============================================================================
// Permission cache rows
// =============================================================================

#[async_trait]
impl PermissionCacheStorage for InMemoryPermissionStore {
    async fn upsert(&self, entry: &PermissionCacheEntry) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .permission_cache
            .insert((entry.user_id, entry.space_id), entry.clone());
        Ok(())
    }

    async fn find(
        &self,
        user_id: UserId,
        space_id: SpaceId,
    ) -> StorageResult<Option<PermissionCacheEntry>> {
        let tables = self.tables.read().await;
        Ok(tables.permission_cache.get(&(user_id, space_id)).cloned())
    }

    async fn find_for_user(&self, user_id: UserId) -> StorageResult<Vec<PermissionCacheEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .permission_cache
            .range((user_id, SpaceId(i64::MIN))..=(user_id, SpaceId(i64::MAX)))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn delete_for_user(&self, user_id: UserId) -> StorageResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.permission_cache.len();
        tables.permission_cache.retain(|(u, _), _| *u != user_id);
        Ok((before - tables.permission_cache.len()) as u64)
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> StorageResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.permission_cache.len();
        tables
            .permission_cache
            .retain(|_, entry| !entry.is_expired(now));
        Ok((before - tables.permission_cache.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn billing(store: &InMemoryPermissionStore) -> Space {
        SpaceStorage::create(
            store,
            &NewSpace {
                name: "billing".into(),
                description: None,
            },
        )
        .await
        .unwrap()
    }

    fn new_permission(space_id: SpaceId, code: &str, position: u8) -> NewPermission {
        NewPermission {
            code: code.into(),
            name: code.into(),
            description: None,
            space_id,
            position,
            value: 1 << position,
            module: None,
        }
    }

    #[tokio::test]
    async fn test_space_name_is_unique() {
        let store = InMemoryPermissionStore::new();
        billing(&store).await;

        let err = SpaceStorage::create(
            &store,
            &NewSpace {
                name: "billing".into(),
                description: None,
            },
        )
        .await
        .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_soft_deleted_permission_keeps_position_and_code() {
        let store = InMemoryPermissionStore::new();
        let space = billing(&store).await;

        let read = PermissionStorage::create(&store, &new_permission(space.id, "invoice.read", 0))
            .await
            .unwrap();
        PermissionStorage::soft_delete(&store, read.id).await.unwrap();

        assert_eq!(store.max_position(space.id).await.unwrap(), Some(0));
        assert!(store.code_exists("invoice.read").await.unwrap());
        assert!(store.find_by_code("invoice.read").await.unwrap().is_none());
        assert!(PermissionStorage::list(&store, Some(space.id)).await.unwrap().is_empty());

        let counts = SpaceStorage::list(&store).await.unwrap();
        assert_eq!(counts[0].permission_count, 0);

        // Deleting twice is a NotFound
        assert!(
            PermissionStorage::soft_delete(&store, read.id)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_position_collision_is_conflict() {
        let store = InMemoryPermissionStore::new();
        let space = billing(&store).await;
        PermissionStorage::create(&store, &new_permission(space.id, "a", 0))
            .await
            .unwrap();
        let err = PermissionStorage::create(&store, &new_permission(space.id, "b", 0))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_role_permission_link_is_idempotent() {
        let store = InMemoryPermissionStore::new();
        let space = billing(&store).await;
        let permission = PermissionStorage::create(&store, &new_permission(space.id, "x", 3))
            .await
            .unwrap();
        let role = RoleStorage::create(
            &store,
            &NewRole {
                name: "viewer".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(RolePermissionStorage::add(&store, role.id, &permission).await.unwrap());
        assert!(!RolePermissionStorage::add(&store, role.id, &permission).await.unwrap());

        let links = store.links_for_role(role.id).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].value, 8);
        assert_eq!(links[0].space_id, space.id);
    }

    #[tokio::test]
    async fn test_user_role_assignment() {
        let store = InMemoryPermissionStore::new();
        let role = RoleStorage::create(
            &store,
            &NewRole {
                name: "admin".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let user = UserId(10);

        store.assign(user, role.id).await.unwrap();
        assert!(store.assign(user, role.id).await.unwrap_err().is_conflict());
        assert_eq!(store.user_ids_for_role(role.id).await.unwrap(), vec![user]);
        assert_eq!(store.roles_for_user(user).await.unwrap()[0].name, "admin");

        UserRoleStorage::remove(&store, user, role.id).await.unwrap();
        assert!(
            UserRoleStorage::remove(&store, user, role.id)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_cache_rows_expire() {
        let store = InMemoryPermissionStore::new();
        let now = OffsetDateTime::now_utc();
        let entry = |space: i64, expires_at| PermissionCacheEntry {
            user_id: UserId(1),
            space_id: SpaceId(space),
            permission_value: 1,
            expires_at,
            updated_at: now,
        };

        store.upsert(&entry(1, now - time::Duration::seconds(5))).await.unwrap();
        store.upsert(&entry(2, now + time::Duration::minutes(5))).await.unwrap();

        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        assert_eq!(store.find_for_user(UserId(1)).await.unwrap().len(), 1);
        assert_eq!(PermissionCacheStorage::delete_for_user(&store, UserId(1)).await.unwrap(), 1);
    }
}
