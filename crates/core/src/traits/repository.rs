//! 仓储接口
//!
//! 所有条件更新返回 `bool`：`true` 表示本节点赢得该行（affected rows = 1），
//! `false` 表示其他节点先行一步。竞争失败不是错误，调用方静默放弃即可。

use async_trait::async_trait;

use crate::models::{SchedulerStatus, StorageInfo, TaskInfo};
use crate::StorageResult;

/// 任务表仓储
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 插入任务行，返回数据库生成的 id
    async fn create(&self, task: &TaskInfo) -> StorageResult<i64>;

    async fn get_by_id(&self, task_id: i64) -> StorageResult<Option<TaskInfo>>;

    /// 仅更新用户配置列（name / cron / task_type / parameters）
    async fn update_definition(&self, task: &TaskInfo) -> StorageResult<()>;

    async fn delete(&self, task_id: i64) -> StorageResult<()>;

    /// 抢占扫描：返回可被本节点认领的任务
    ///
    /// 命中条件：新建任务、定向让渡给本节点的被放弃任务、
    /// 或 `update_time` 早于 `stale_before_ms` 的过期租约。
    async fn fetch_preemptable(
        &self,
        storage_id: i64,
        stale_before_ms: i64,
        limit: i64,
    ) -> StorageResult<Vec<TaskInfo>>;

    /// 条件认领：以 `(epoch, scheduler_status)` 为乐观并发守卫
    async fn try_preempt(
        &self,
        task_id: i64,
        storage_id: i64,
        observed_epoch: i64,
        observed_status: SchedulerStatus,
    ) -> StorageResult<bool>;

    /// 续约：递增 epoch 并推进 `update_time`，以 `(occupier_id, epoch)` 为守卫
    async fn refresh_lease(
        &self,
        task_id: i64,
        storage_id: i64,
        observed_epoch: i64,
    ) -> StorageResult<bool>;

    /// 占有者自降级为 `Discarded` 并清零 `occupier_id`；保留 `candidate_id`
    /// 以便定向让渡
    async fn discard(&self, task_id: i64, storage_id: i64) -> StorageResult<bool>;

    /// 终态转移
    async fn mark_end(&self, task_id: i64) -> StorageResult<bool>;

    /// 均衡扫描：他人占有、处于抢占状态的任务
    async fn fetch_balance_batch(
        &self,
        storage_id: i64,
        limit: i64,
    ) -> StorageResult<Vec<TaskInfo>>;

    /// 条件提名候选者，以观察到的 `(occupier_id, candidate_id)` 为守卫
    async fn nominate_candidate(
        &self,
        task_id: i64,
        candidate_id: i64,
        observed_occupier: i64,
        observed_candidate: i64,
    ) -> StorageResult<bool>;
}

/// 节点表仓储
#[async_trait]
pub trait StorageRepository: Send + Sync {
    /// 插入节点行（payload = 0），返回数据库生成的节点 id
    async fn register(&self, now_ms: i64) -> StorageResult<i64>;

    async fn deregister(&self, storage_id: i64) -> StorageResult<()>;

    async fn update_payload(
        &self,
        storage_id: i64,
        payload: i32,
        now_ms: i64,
    ) -> StorageResult<()>;

    /// 读取指定节点的负载；节点行不存在时返回 `None`
    async fn get_payload(&self, storage_id: i64) -> StorageResult<Option<i32>>;

    async fn get_by_id(&self, storage_id: i64) -> StorageResult<Option<StorageInfo>>;
}
