//! 表结构初始化
//!
//! 时间戳列统一为 unix 毫秒。索引服务于抢占扫描
//! （状态 + 租约新鲜度）与均衡扫描（状态 + 占有者）。

use rcron_core::{StorageError, StorageResult};
use sqlx::{PgPool, SqlitePool};

/// 初始化 PostgreSQL 表结构
pub async fn create_postgres_schema(pool: &PgPool) -> StorageResult<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            cron VARCHAR(100) NOT NULL,
            task_type VARCHAR(50) NOT NULL,
            parameters JSONB NOT NULL DEFAULT '{}',
            scheduler_status SMALLINT NOT NULL DEFAULT 0,
            occupier_id BIGINT NOT NULL DEFAULT 0,
            candidate_id BIGINT NOT NULL DEFAULT 0,
            epoch BIGINT NOT NULL DEFAULT 0,
            create_time BIGINT NOT NULL,
            update_time BIGINT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS storages (
            id BIGSERIAL PRIMARY KEY,
            payload INTEGER NOT NULL DEFAULT 0,
            create_time BIGINT NOT NULL,
            update_time BIGINT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_tasks_status_update_time ON tasks(scheduler_status, update_time)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_status_occupier ON tasks(scheduler_status, occupier_id)",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(StorageError::Database)?;
    }
    Ok(())
}

/// 初始化 SQLite 表结构
pub async fn create_sqlite_schema(pool: &SqlitePool) -> StorageResult<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            cron TEXT NOT NULL,
            task_type TEXT NOT NULL,
            parameters TEXT NOT NULL DEFAULT '{}',
            scheduler_status INTEGER NOT NULL DEFAULT 0,
            occupier_id INTEGER NOT NULL DEFAULT 0,
            candidate_id INTEGER NOT NULL DEFAULT 0,
            epoch INTEGER NOT NULL DEFAULT 0,
            create_time INTEGER NOT NULL,
            update_time INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS storages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            payload INTEGER NOT NULL DEFAULT 0,
            create_time INTEGER NOT NULL,
            update_time INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_tasks_status_update_time ON tasks(scheduler_status, update_time)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_status_occupier ON tasks(scheduler_status, occupier_id)",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(StorageError::Database)?;
    }
    Ok(())
}
