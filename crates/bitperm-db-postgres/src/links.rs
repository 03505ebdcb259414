//! User-role and role-permission link storage.

use async_trait::async_trait;
use bitperm_storage::{
    Permission, PermissionDetail, PermissionId, Role, RoleId, RolePermission,
    RolePermissionStorage, SpaceId, StorageError, StorageResult, UserId, UserRole,
    UserRoleStorage,
};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use time::OffsetDateTime;

use crate::PostgresPermissionStore;
use crate::error::DbResultExt;
use crate::permission::{PermissionDetailTuple, detail_from_tuple};
use crate::role::{RoleTuple, role_from_tuple};

#[async_trait]
impl UserRoleStorage for PostgresPermissionStore {
    async fn assign(&self, user_id: UserId, role_id: RoleId) -> StorageResult<UserRole> {
        let created_at: OffsetDateTime = query_scalar(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            VALUES ($1, $2)
            RETURNING created_at
            "#,
        )
        .bind(user_id.get())
        .bind(role_id.get())
        .fetch_one(self.pool())
        .await
        .db_context(&format!("role {role_id} for user {user_id}"))?;

        Ok(UserRole {
            user_id,
            role_id,
            created_at,
        })
    }

    async fn remove(&self, user_id: UserId, role_id: RoleId) -> StorageResult<()> {
        let result = query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id.get())
            .bind(role_id.get())
            .execute(self.pool())
            .await
            .db_context("user role")?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!(
                "user {user_id} does not have role {role_id}"
            )));
        }
        Ok(())
    }

    async fn exists(&self, user_id: UserId, role_id: RoleId) -> StorageResult<bool> {
        let exists: bool = query_scalar(
            "SELECT EXISTS (SELECT 1 FROM user_roles WHERE user_id = $1 AND role_id = $2)",
        )
        .bind(user_id.get())
        .bind(role_id.get())
        .fetch_one(self.pool())
        .await
        .db_context("user role")?;
        Ok(exists)
    }

    async fn roles_for_user(&self, user_id: UserId) -> StorageResult<Vec<Role>> {
        let rows: Vec<RoleTuple> = query_as(
            r#"
            SELECT r.id, r.name, r.description, r.is_active, r.is_system, r.created_at, r.updated_at
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1
            ORDER BY r.id
            "#,
        )
        .bind(user_id.get())
        .fetch_all(self.pool())
        .await
        .db_context("user roles")?;

        Ok(rows.into_iter().map(role_from_tuple).collect())
    }

    async fn user_ids_for_role(&self, role_id: RoleId) -> StorageResult<Vec<UserId>> {
        let ids: Vec<i64> =
            query_scalar("SELECT user_id FROM user_roles WHERE role_id = $1 ORDER BY user_id")
                .bind(role_id.get())
                .fetch_all(self.pool())
                .await
                .db_context("user roles")?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    async fn delete_for_role(&self, role_id: RoleId) -> StorageResult<u64> {
        let result = query("DELETE FROM user_roles WHERE role_id = $1")
            .bind(role_id.get())
            .execute(self.pool())
            .await
            .db_context("user roles")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RolePermissionStorage for PostgresPermissionStore {
    async fn add(&self, role_id: RoleId, permission: &Permission) -> StorageResult<bool> {
        let result = query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id, space_id, value)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (role_id, permission_id) DO NOTHING
            "#,
        )
        .bind(role_id.get())
        .bind(permission.id.get())
        .bind(permission.space_id.get())
        .bind(permission.value as i64)
        .execute(self.pool())
        .await
        .db_context(&format!("role {role_id}"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn remove(&self, role_id: RoleId, permission_id: PermissionId) -> StorageResult<bool> {
        let result =
            query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
                .bind(role_id.get())
                .bind(permission_id.get())
                .execute(self.pool())
                .await
                .db_context("role permission")?;
        Ok(result.rows_affected() > 0)
    }

    async fn links_for_role(&self, role_id: RoleId) -> StorageResult<Vec<RolePermission>> {
        let rows: Vec<(i64, i64, i64, OffsetDateTime)> = query_as(
            r#"
            SELECT permission_id, space_id, value, created_at
            FROM role_permissions
            WHERE role_id = $1
            ORDER BY permission_id
            "#,
        )
        .bind(role_id.get())
        .fetch_all(self.pool())
        .await
        .db_context("role permissions")?;

        Ok(rows
            .into_iter()
            .map(|(permission_id, space_id, value, created_at)| RolePermission {
                role_id,
                permission_id: PermissionId(permission_id),
                space_id: SpaceId(space_id),
                value: value as u64,
                created_at,
            })
            .collect())
    }

    async fn permissions_for_role(&self, role_id: RoleId) -> StorageResult<Vec<PermissionDetail>> {
        let rows: Vec<PermissionDetailTuple> = query_as(
            r#"
            SELECT p.id, p.code, p.name, p.description, p.space_id, p.position, p.value,
                   p.module, p.is_active, p.created_at, p.updated_at, p.deleted_at, s.name
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            JOIN permission_spaces s ON s.id = p.space_id
            WHERE rp.role_id = $1 AND p.deleted_at IS NULL
            ORDER BY p.space_id, p.position
            "#,
        )
        .bind(role_id.get())
        .fetch_all(self.pool())
        .await
        .db_context("role permissions")?;

        Ok(rows.into_iter().map(detail_from_tuple).collect())
    }

    async fn delete_for_role(&self, role_id: RoleId) -> StorageResult<u64> {
        let result = query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id.get())
            .execute(self.pool())
            .await
            .db_context("role permissions")?;
        Ok(result.rows_affected())
    }
}
