//! Permission storage.
//!
//! `position` is stored as SMALLINT and `value` as BIGINT holding the bit
//! pattern of the `u64` mask.

use async_trait::async_trait;
use bitperm_storage::{
    NewPermission, Permission, PermissionDetail, PermissionId, PermissionStorage, PermissionUpdate,
    SpaceId, StorageError, StorageResult,
};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use time::OffsetDateTime;

use crate::PostgresPermissionStore;
use crate::error::DbResultExt;

pub(crate) type PermissionTuple = (
    i64,
    String,
    String,
    Option<String>,
    i64,
    i16,
    i64,
    Option<String>,
    bool,
    OffsetDateTime,
    OffsetDateTime,
    Option<OffsetDateTime>,
);

pub(crate) type PermissionDetailTuple = (
    i64,
    String,
    String,
    Option<String>,
    i64,
    i16,
    i64,
    Option<String>,
    bool,
    OffsetDateTime,
    OffsetDateTime,
    Option<OffsetDateTime>,
    String,
);

pub(crate) fn permission_from_tuple(row: PermissionTuple) -> Permission {
    Permission {
        id: PermissionId(row.0),
        code: row.1,
        name: row.2,
        description: row.3,
        space_id: SpaceId(row.4),
        position: row.5 as u8,
        value: row.6 as u64,
        module: row.7,
        is_active: row.8,
        created_at: row.9,
        updated_at: row.10,
        deleted_at: row.11,
    }
}

pub(crate) fn detail_from_tuple(row: PermissionDetailTuple) -> PermissionDetail {
    let space_name = row.12;
    PermissionDetail {
        permission: permission_from_tuple((
            row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7, row.8, row.9, row.10, row.11,
        )),
        space_name,
    }
}

#[async_trait]
impl PermissionStorage for PostgresPermissionStore {
    async fn create(&self, permission: &NewPermission) -> StorageResult<Permission> {
        let row: PermissionTuple = query_as(
            r#"
            INSERT INTO permissions (code, name, description, space_id, position, value, module)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, code, name, description, space_id, position, value, module,
                      is_active, created_at, updated_at, deleted_at
            "#,
        )
        .bind(&permission.code)
        .bind(&permission.name)
        .bind(&permission.description)
        .bind(permission.space_id.get())
        .bind(i16::from(permission.position))
        .bind(permission.value as i64)
        .bind(&permission.module)
        .fetch_one(self.pool())
        .await
        .db_context(&format!("permission '{}'", permission.code))?;

        Ok(permission_from_tuple(row))
    }

    async fn find_by_id(&self, id: PermissionId) -> StorageResult<Option<Permission>> {
        let row: Option<PermissionTuple> = query_as(
            r#"
            SELECT id, code, name, description, space_id, position, value, module,
                   is_active, created_at, updated_at, deleted_at
            FROM permissions
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.get())
        .fetch_optional(self.pool())
        .await
        .db_context("permission")?;

        Ok(row.map(permission_from_tuple))
    }

    async fn find_by_code(&self, code: &str) -> StorageResult<Option<Permission>> {
        let row: Option<PermissionTuple> = query_as(
            r#"
            SELECT id, code, name, description, space_id, position, value, module,
                   is_active, created_at, updated_at, deleted_at
            FROM permissions
            WHERE code = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(code)
        .fetch_optional(self.pool())
        .await
        .db_context("permission")?;

        Ok(row.map(permission_from_tuple))
    }

    async fn code_exists(&self, code: &str) -> StorageResult<bool> {
        let exists: bool = query_scalar("SELECT EXISTS (SELECT 1 FROM permissions WHERE code = $1)")
            .bind(code)
            .fetch_one(self.pool())
            .await
            .db_context("permission")?;
        Ok(exists)
    }

    async fn max_position(&self, space_id: SpaceId) -> StorageResult<Option<u8>> {
        let max: Option<i16> =
            query_scalar("SELECT MAX(position) FROM permissions WHERE space_id = $1")
                .bind(space_id.get())
                .fetch_one(self.pool())
                .await
                .db_context("permission")?;
        Ok(max.map(|p| p as u8))
    }

    async fn list(&self, space_id: Option<SpaceId>) -> StorageResult<Vec<PermissionDetail>> {
        let rows: Vec<PermissionDetailTuple> = query_as(
            r#"
            SELECT p.id, p.code, p.name, p.description, p.space_id, p.position, p.value,
                   p.module, p.is_active, p.created_at, p.updated_at, p.deleted_at, s.name
            FROM permissions p
            JOIN permission_spaces s ON s.id = p.space_id
            WHERE p.deleted_at IS NULL
              AND ($1::BIGINT IS NULL OR p.space_id = $1)
            ORDER BY p.space_id, p.position
            "#,
        )
        .bind(space_id.map(SpaceId::get))
        .fetch_all(self.pool())
        .await
        .db_context("permissions")?;

        Ok(rows.into_iter().map(detail_from_tuple).collect())
    }

    async fn update(
        &self,
        id: PermissionId,
        update: &PermissionUpdate,
    ) -> StorageResult<Permission> {
        let row: Option<PermissionTuple> = query_as(
            r#"
            UPDATE permissions
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                is_active = COALESCE($4, is_active),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING id, code, name, description, space_id, position, value, module,
                      is_active, created_at, updated_at, deleted_at
            "#,
        )
        .bind(id.get())
        .bind(&update.name)
        .bind(&update.description)
        .bind(update.is_active)
        .fetch_optional(self.pool())
        .await
        .db_context("permission")?;

        row.map(permission_from_tuple)
            .ok_or_else(|| StorageError::not_found(format!("permission {id}")))
    }

    async fn soft_delete(&self, id: PermissionId) -> StorageResult<()> {
        let result = query(
            r#"
            UPDATE permissions
            SET deleted_at = NOW(), is_active = FALSE, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.get())
        .execute(self.pool())
        .await
        .db_context("permission")?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!("permission {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_bit_survives_signed_storage() {
        let value: u64 = 1 << 63;
        let stored = value as i64;
        assert!(stored < 0);

        let now = OffsetDateTime::now_utc();
        let permission = permission_from_tuple((
            1,
            "audit.export".into(),
            "Export".into(),
            None,
            2,
            63,
            stored,
            None,
            true,
            now,
            now,
            None,
        ));
        assert_eq!(permission.position, 63);
        assert_eq!(permission.value, value);
    }
}
