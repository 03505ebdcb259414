//! `user_permission_cache` storage.

use async_trait::async_trait;
use bitperm_storage::{
    PermissionCacheEntry, PermissionCacheStorage, SpaceId, StorageResult, UserId,
};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::PostgresPermissionStore;
use crate::error::DbResultExt;

type CacheTuple = (i64, i64, i64, OffsetDateTime, OffsetDateTime);

fn entry_from_tuple(row: CacheTuple) -> PermissionCacheEntry {
    PermissionCacheEntry {
        user_id: UserId(row.0),
        space_id: SpaceId(row.1),
        permission_value: row.2 as u64,
        expires_at: row.3,
        updated_at: row.4,
    }
}

#[async_trait]
impl PermissionCacheStorage for PostgresPermissionStore {
    async fn upsert(&self, entry: &PermissionCacheEntry) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO user_permission_cache (user_id, space_id, permission_value, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, space_id) DO UPDATE
            SET permission_value = EXCLUDED.permission_value,
                expires_at = EXCLUDED.expires_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(entry.user_id.get())
        .bind(entry.space_id.get())
        .bind(entry.permission_value as i64)
        .bind(entry.expires_at)
        .bind(entry.updated_at)
        .execute(self.pool())
        .await
        .db_context("permission cache")?;
        Ok(())
    }

    async fn find(
        &self,
        user_id: UserId,
        space_id: SpaceId,
    ) -> StorageResult<Option<PermissionCacheEntry>> {
        let row: Option<CacheTuple> = query_as(
            r#"
            SELECT user_id, space_id, permission_value, expires_at, updated_at
            FROM user_permission_cache
            WHERE user_id = $1 AND space_id = $2
            "#,
        )
        .bind(user_id.get())
        .bind(space_id.get())
        .fetch_optional(self.pool())
        .await
        .db_context("permission cache")?;

        Ok(row.map(entry_from_tuple))
    }

    async fn find_for_user(&self, user_id: UserId) -> StorageResult<Vec<PermissionCacheEntry>> {
        let rows: Vec<CacheTuple> = query_as(
            r#"
            SELECT user_id, space_id, permission_value, expires_at, updated_at
            FROM user_permission_cache
            WHERE user_id = $1
            ORDER BY space_id
            "#,
        )
        .bind(user_id.get())
        .fetch_all(self.pool())
        .await
        .db_context("permission cache")?;

        Ok(rows.into_iter().map(entry_from_tuple).collect())
    }

    async fn delete_for_user(&self, user_id: UserId) -> StorageResult<u64> {
        let result = query("DELETE FROM user_permission_cache WHERE user_id = $1")
            .bind(user_id.get())
            .execute(self.pool())
            .await
            .db_context("permission cache")?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> StorageResult<u64> {
        let result = query("DELETE FROM user_permission_cache WHERE expires_at <= $1")
            .bind(now)
            .execute(self.pool())
            .await
            .db_context("permission cache")?;

        if result.rows_affected() > 0 {
            tracing::debug!(removed = result.rows_affected(), "purged expired permission cache rows");
        }
        Ok(result.rows_affected())
    }
}
