//! Permission space storage.

use async_trait::async_trait;
use bitperm_storage::{NewSpace, Space, SpaceId, SpaceStorage, SpaceWithCount, StorageResult};
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::PostgresPermissionStore;
use crate::error::DbResultExt;

type SpaceTuple = (
    i64,
    String,
    Option<String>,
    bool,
    OffsetDateTime,
    OffsetDateTime,
);

fn space_from_tuple(row: SpaceTuple) -> Space {
    Space {
        id: SpaceId(row.0),
        name: row.1,
        description: row.2,
        is_active: row.3,
        created_at: row.4,
        updated_at: row.5,
    }
}

#[async_trait]
impl SpaceStorage for PostgresPermissionStore {
    async fn create(&self, space: &NewSpace) -> StorageResult<Space> {
        let row: SpaceTuple = query_as(
            r#"
            INSERT INTO permission_spaces (name, description)
            VALUES ($1, $2)
            RETURNING id, name, description, is_active, created_at, updated_at
            "#,
        )
        .bind(&space.name)
        .bind(&space.description)
        .fetch_one(self.pool())
        .await
        .db_context(&format!("space '{}'", space.name))?;

        Ok(space_from_tuple(row))
    }

    async fn find_by_id(&self, id: SpaceId) -> StorageResult<Option<Space>> {
        let row: Option<SpaceTuple> = query_as(
            r#"
            SELECT id, name, description, is_active, created_at, updated_at
            FROM permission_spaces
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(self.pool())
        .await
        .db_context("space")?;

        Ok(row.map(space_from_tuple))
    }

    async fn find_by_name(&self, name: &str) -> StorageResult<Option<Space>> {
        let row: Option<SpaceTuple> = query_as(
            r#"
            SELECT id, name, description, is_active, created_at, updated_at
            FROM permission_spaces
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await
        .db_context("space")?;

        Ok(row.map(space_from_tuple))
    }

    async fn list(&self) -> StorageResult<Vec<SpaceWithCount>> {
        let rows: Vec<(
            i64,
            String,
            Option<String>,
            bool,
            OffsetDateTime,
            OffsetDateTime,
            i64,
        )> = query_as(
            r#"
            SELECT s.id, s.name, s.description, s.is_active, s.created_at, s.updated_at,
                   COUNT(p.id) FILTER (WHERE p.deleted_at IS NULL)
            FROM permission_spaces s
            LEFT JOIN permissions p ON p.space_id = s.id
            GROUP BY s.id
            ORDER BY s.id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .db_context("spaces")?;

        Ok(rows
            .into_iter()
            .map(|r| SpaceWithCount {
                space: space_from_tuple((r.0, r.1, r.2, r.3, r.4, r.5)),
                permission_count: r.6,
            })
            .collect())
    }
}
