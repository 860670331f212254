#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rcron_core::time::now_millis;
use rcron_core::{
    SchedulerStatus, StorageConfig, StorageRepository, TaskInfo, TaskRepository,
};
use rcron_storage::database::schema::create_sqlite_schema;
use rcron_storage::{SqliteStorageRepository, SqliteTaskRepository};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

/// 内存 SQLite 测试环境
///
/// 单连接池：内存库随连接存在，多个仓储共享同一个库。
pub struct TestDatabase {
    pub pool: SqlitePool,
}

impl TestDatabase {
    pub async fn new() -> anyhow::Result<Self> {
        // 重复初始化返回错误，忽略即可
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        create_sqlite_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn task_repo(&self) -> Arc<dyn TaskRepository> {
        Arc::new(SqliteTaskRepository::new(self.pool.clone()))
    }

    pub fn storage_repo(&self) -> Arc<dyn StorageRepository> {
        Arc::new(SqliteStorageRepository::new(self.pool.clone()))
    }

    /// 直接插入一行任务，绕过 CRUD 接口以便构造任意协调状态
    pub async fn insert_task_row(
        &self,
        status: SchedulerStatus,
        occupier_id: i64,
        candidate_id: i64,
        epoch: i64,
        update_time: i64,
    ) -> anyhow::Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (name, cron, task_type, parameters, scheduler_status,
                               occupier_id, candidate_id, epoch, create_time, update_time)
            VALUES ('test task', '*/5 * * * * * *', 'http', '{}', $1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(status)
        .bind(occupier_id)
        .bind(candidate_id)
        .bind(epoch)
        .bind(now_millis())
        .bind(update_time)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_task(&self, task_id: i64) -> anyhow::Result<TaskInfo> {
        self.task_repo()
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("任务 {task_id} 不存在"))
    }

    pub async fn set_storage_payload(&self, storage_id: i64, payload: i32) -> anyhow::Result<()> {
        sqlx::query("UPDATE storages SET payload = $1, update_time = $2 WHERE id = $3")
            .bind(payload)
            .bind(now_millis())
            .bind(storage_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_storage_payload(&self, storage_id: i64) -> anyhow::Result<Option<i32>> {
        let row = sqlx::query("SELECT payload FROM storages WHERE id = $1")
            .bind(storage_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("payload")))
    }

    pub async fn storage_row_exists(&self, storage_id: i64) -> anyhow::Result<bool> {
        let row = sqlx::query("SELECT id FROM storages WHERE id = $1")
            .bind(storage_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// 带外改写 epoch，模拟续约 CAS 永远落空
    pub async fn bump_task_epoch(&self, task_id: i64, epoch: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE tasks SET epoch = $1 WHERE id = $2")
            .bind(epoch)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// 示例任务定义
pub fn sample_task(name: &str) -> TaskInfo {
    TaskInfo::new(
        name.to_string(),
        "*/5 * * * * * *".to_string(),
        "http".to_string(),
        serde_json::json!({"url": "http://www.example.com", "timeout": 30}),
    )
}

/// 协调周期压缩到毫秒级的测试配置
pub fn fast_config() -> StorageConfig {
    StorageConfig {
        preempt_interval_ms: 100,
        refresh_interval_ms: 1000,
        refresh_retry_max: 3,
        refresh_retry_interval_ms: 100,
        lookup_interval_ms: 200,
        preempt_batch: 10,
        lookup_batch: 10,
        event_channel_capacity: 16,
        stop_timeout_ms: 5000,
    }
}

/// 轮询等待条件成立，超时返回 false
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
