use async_trait::async_trait;
use rcron_core::time::now_millis;
use rcron_core::{SchedulerStatus, StorageError, StorageResult, TaskInfo, TaskRepository};
use sqlx::{Row, SqlitePool};
use tracing::debug;

const TASK_COLUMNS: &str = "id, name, cron, task_type, parameters, scheduler_status, \
                            occupier_id, candidate_id, epoch, create_time, update_time";

/// SQLite 任务仓储实现
///
/// 面向嵌入式部署与测试场景；`parameters` 以 JSON 文本列存储。
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task_info(row: &sqlx::sqlite::SqliteRow) -> StorageResult<TaskInfo> {
        let parameters_json: String = row.try_get("parameters")?;
        let parameters = serde_json::from_str(&parameters_json)
            .map_err(|e| StorageError::Serialization(format!("解析任务参数失败: {e}")))?;

        Ok(TaskInfo {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            cron: row.try_get("cron")?,
            task_type: row.try_get("task_type")?,
            parameters,
            scheduler_status: row.try_get("scheduler_status")?,
            occupier_id: row.try_get("occupier_id")?,
            candidate_id: row.try_get("candidate_id")?,
            epoch: row.try_get("epoch")?,
            create_time: row.try_get("create_time")?,
            update_time: row.try_get("update_time")?,
        })
    }

    fn parameters_json(task: &TaskInfo) -> StorageResult<String> {
        serde_json::to_string(&task.parameters)
            .map_err(|e| StorageError::Serialization(format!("序列化任务参数失败: {e}")))
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &TaskInfo) -> StorageResult<i64> {
        let parameters_json = Self::parameters_json(task)?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (name, cron, task_type, parameters, scheduler_status,
                               occupier_id, candidate_id, epoch, create_time, update_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&task.name)
        .bind(&task.cron)
        .bind(&task.task_type)
        .bind(parameters_json)
        .bind(task.scheduler_status)
        .bind(task.occupier_id)
        .bind(task.candidate_id)
        .bind(task.epoch)
        .bind(task.create_time)
        .bind(task.update_time)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        let task_id = result.last_insert_rowid();
        debug!("插入任务成功: {} ({})", task.name, task_id);
        Ok(task_id)
    }

    async fn get_by_id(&self, task_id: i64) -> StorageResult<Option<TaskInfo>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task_info(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_definition(&self, task: &TaskInfo) -> StorageResult<()> {
        let parameters_json = Self::parameters_json(task)?;

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET name = $2, cron = $3, task_type = $4, parameters = $5, update_time = $6
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(&task.name)
        .bind(&task.cron)
        .bind(&task.task_type)
        .bind(parameters_json)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TaskNotFound { id: task.id });
        }

        debug!("更新任务成功: {}", task.id);
        Ok(())
    }

    async fn delete(&self, task_id: i64) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TaskNotFound { id: task_id });
        }

        debug!("删除任务成功: {}", task_id);
        Ok(())
    }

    async fn fetch_preemptable(
        &self,
        storage_id: i64,
        stale_before_ms: i64,
        limit: i64,
    ) -> StorageResult<Vec<TaskInfo>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE scheduler_status = $1
               OR (scheduler_status = $2 AND candidate_id = $3)
               OR (scheduler_status = $4 AND update_time < $5)
            ORDER BY id
            LIMIT $6
            "#
        ))
        .bind(SchedulerStatus::Created)
        .bind(SchedulerStatus::Discarded)
        .bind(storage_id)
        .bind(SchedulerStatus::Preempted)
        .bind(stale_before_ms)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.iter().map(Self::row_to_task_info).collect()
    }

    async fn try_preempt(
        &self,
        task_id: i64,
        storage_id: i64,
        observed_epoch: i64,
        observed_status: SchedulerStatus,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET scheduler_status = $1, occupier_id = $2, candidate_id = 0,
                epoch = epoch + 1, update_time = $3
            WHERE id = $4 AND epoch = $5 AND scheduler_status = $6
            "#,
        )
        .bind(SchedulerStatus::Preempted)
        .bind(storage_id)
        .bind(now_millis())
        .bind(task_id)
        .bind(observed_epoch)
        .bind(observed_status)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn refresh_lease(
        &self,
        task_id: i64,
        storage_id: i64,
        observed_epoch: i64,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET epoch = epoch + 1, update_time = $1
            WHERE id = $2 AND occupier_id = $3 AND epoch = $4
            "#,
        )
        .bind(now_millis())
        .bind(task_id)
        .bind(storage_id)
        .bind(observed_epoch)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn discard(&self, task_id: i64, storage_id: i64) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET scheduler_status = $1, occupier_id = 0, update_time = $2
            WHERE id = $3 AND occupier_id = $4
            "#,
        )
        .bind(SchedulerStatus::Discarded)
        .bind(now_millis())
        .bind(task_id)
        .bind(storage_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        let demoted = result.rows_affected() == 1;
        if demoted {
            debug!("任务降级为待让渡: {}", task_id);
        }
        Ok(demoted)
    }

    async fn mark_end(&self, task_id: i64) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET scheduler_status = $1, occupier_id = 0, candidate_id = 0, update_time = $2
            WHERE id = $3 AND scheduler_status <> $1
            "#,
        )
        .bind(SchedulerStatus::End)
        .bind(now_millis())
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn fetch_balance_batch(
        &self,
        storage_id: i64,
        limit: i64,
    ) -> StorageResult<Vec<TaskInfo>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE scheduler_status = $1 AND occupier_id <> $2 AND occupier_id <> 0
            ORDER BY id
            LIMIT $3
            "#
        ))
        .bind(SchedulerStatus::Preempted)
        .bind(storage_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.iter().map(Self::row_to_task_info).collect()
    }

    async fn nominate_candidate(
        &self,
        task_id: i64,
        candidate_id: i64,
        observed_occupier: i64,
        observed_candidate: i64,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET candidate_id = $1, update_time = $2
            WHERE id = $3 AND occupier_id = $4
              AND (candidate_id = 0 OR candidate_id = $5)
            "#,
        )
        .bind(candidate_id)
        .bind(now_millis())
        .bind(task_id)
        .bind(observed_occupier)
        .bind(observed_candidate)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(result.rows_affected() == 1)
    }
}
