//! Role storage.

use async_trait::async_trait;
use bitperm_storage::{NewRole, Role, RoleId, RoleStorage, RoleUpdate, StorageError, StorageResult};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::PostgresPermissionStore;
use crate::error::DbResultExt;

pub(crate) type RoleTuple = (
    i64,
    String,
    Option<String>,
    bool,
    bool,
    OffsetDateTime,
    OffsetDateTime,
);

pub(crate) fn role_from_tuple(row: RoleTuple) -> Role {
    Role {
        id: RoleId(row.0),
        name: row.1,
        description: row.2,
        is_active: row.3,
        is_system: row.4,
        created_at: row.5,
        updated_at: row.6,
    }
}

#[async_trait]
impl RoleStorage for PostgresPermissionStore {
    async fn create(&self, role: &NewRole) -> StorageResult<Role> {
        let row: RoleTuple = query_as(
            r#"
            INSERT INTO roles (name, description, is_system)
            VALUES ($1, $2, $3)
            RETURNING id, name, description, is_active, is_system, created_at, updated_at
            "#,
        )
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_system)
        .fetch_one(self.pool())
        .await
        .db_context(&format!("role '{}'", role.name))?;

        Ok(role_from_tuple(row))
    }

    async fn find_by_id(&self, id: RoleId) -> StorageResult<Option<Role>> {
        let row: Option<RoleTuple> = query_as(
            r#"
            SELECT id, name, description, is_active, is_system, created_at, updated_at
            FROM roles
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(self.pool())
        .await
        .db_context("role")?;

        Ok(row.map(role_from_tuple))
    }

    async fn find_by_name(&self, name: &str) -> StorageResult<Option<Role>> {
        let row: Option<RoleTuple> = query_as(
            r#"
            SELECT id, name, description, is_active, is_system, created_at, updated_at
            FROM roles
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await
        .db_context("role")?;

        Ok(row.map(role_from_tuple))
    }

    async fn list(&self) -> StorageResult<Vec<Role>> {
        let rows: Vec<RoleTuple> = query_as(
            r#"
            SELECT id, name, description, is_active, is_system, created_at, updated_at
            FROM roles
            ORDER BY id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .db_context("roles")?;

        Ok(rows.into_iter().map(role_from_tuple).collect())
    }

    async fn update(&self, id: RoleId, update: &RoleUpdate) -> StorageResult<Role> {
        let what = match &update.name {
            Some(name) => format!("role '{name}'"),
            None => format!("role {id}"),
        };
        let row: Option<RoleTuple> = query_as(
            r#"
            UPDATE roles
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                is_active = COALESCE($4, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, description, is_active, is_system, created_at, updated_at
            "#,
        )
        .bind(id.get())
        .bind(&update.name)
        .bind(&update.description)
        .bind(update.is_active)
        .fetch_optional(self.pool())
        .await
        .db_context(&what)?;

        row.map(role_from_tuple)
            .ok_or_else(|| StorageError::not_found(format!("role {id}")))
    }

    async fn delete(&self, id: RoleId) -> StorageResult<()> {
        let result = query("DELETE FROM roles WHERE id = $1")
            .bind(id.get())
            .execute(self.pool())
            .await
            .db_context("role")?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!("role {id}")));
        }
        Ok(())
    }
}
