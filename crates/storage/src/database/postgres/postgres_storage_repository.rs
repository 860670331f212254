use async_trait::async_trait;
use rcron_core::{StorageError, StorageInfo, StorageRepository, StorageResult};
use sqlx::{PgPool, Row};
use tracing::debug;

/// PostgreSQL 节点仓储实现
pub struct PostgresStorageRepository {
    pool: PgPool,
}

impl PostgresStorageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StorageRepository for PostgresStorageRepository {
    async fn register(&self, now_ms: i64) -> StorageResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO storages (payload, create_time, update_time)
            VALUES (0, $1, $2)
            RETURNING id
            "#,
        )
        .bind(now_ms)
        .bind(now_ms)
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        let storage_id: i64 = row.try_get("id")?;
        debug!("注册节点成功: {}", storage_id);
        Ok(storage_id)
    }

    async fn deregister(&self, storage_id: i64) -> StorageResult<()> {
        sqlx::query("DELETE FROM storages WHERE id = $1")
            .bind(storage_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        debug!("注销节点成功: {}", storage_id);
        Ok(())
    }

    async fn update_payload(
        &self,
        storage_id: i64,
        payload: i32,
        now_ms: i64,
    ) -> StorageResult<()> {
        sqlx::query("UPDATE storages SET payload = $1, update_time = $2 WHERE id = $3")
            .bind(payload)
            .bind(now_ms)
            .bind(storage_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn get_payload(&self, storage_id: i64) -> StorageResult<Option<i32>> {
        let row = sqlx::query("SELECT payload FROM storages WHERE id = $1")
            .bind(storage_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        match row {
            Some(row) => Ok(Some(row.try_get("payload")?)),
            None => Ok(None),
        }
    }

    async fn get_by_id(&self, storage_id: i64) -> StorageResult<Option<StorageInfo>> {
        let row = sqlx::query(
            "SELECT id, payload, create_time, update_time FROM storages WHERE id = $1",
        )
        .bind(storage_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        match row {
            Some(row) => Ok(Some(StorageInfo {
                id: row.try_get("id")?,
                payload: row.try_get("payload")?,
                create_time: row.try_get("create_time")?,
                update_time: row.try_get("update_time")?,
            })),
            None => Ok(None),
        }
    }
}
