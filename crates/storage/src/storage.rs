use std::sync::Arc;
use std::time::Duration;

use rcron_core::time::now_millis;
use rcron_core::{
    SchedulerStatus, StorageConfig, StorageError, StorageRepository, StorageResult, TaskEvent,
    TaskInfo, TaskRepository,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::events::EventBus;
use crate::lookup::Lookup;
use crate::preempter::Preempter;
use crate::refresher::Refresher;
use crate::registry::Registry;
use crate::shutdown::ShutdownManager;

/// 协调节点门面
///
/// 一个 `Storage` 实例对应一个参与协调的调度节点：注册自身身份，
/// 启动抢占、续约、均衡与负载持久化四类循环，对执行器暴露任务
/// CRUD、让渡/终结操作与所有权事件流。
///
/// # 使用示例
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rcron_core::{StorageConfig, TaskInfo};
/// use rcron_storage::{PostgresStorageRepository, PostgresTaskRepository, Storage};
///
/// # async fn run(pool: sqlx::PgPool) -> rcron_core::StorageResult<()> {
/// let tasks = Arc::new(PostgresTaskRepository::new(pool.clone()));
/// let storages = Arc::new(PostgresStorageRepository::new(pool));
/// let storage = Storage::register(tasks, storages, StorageConfig::default()).await?;
///
/// let mut events = storage.take_events().await.expect("事件流只能取走一次");
/// storage.start().await?;
///
/// while let Some(event) = events.recv().await {
///     // 交给执行器处理所有权转移
///     println!("{:?} -> {}", event.event_type, event.task_id());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Storage {
    config: StorageConfig,
    tasks: Arc<dyn TaskRepository>,
    registry: Arc<Registry>,
    refresher: Arc<Refresher>,
    preempter: Arc<Preempter>,
    lookup: Arc<Lookup>,
    events: EventBus,
    events_rx: Mutex<Option<mpsc::Receiver<TaskEvent>>>,
    shutdown: ShutdownManager,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Storage {
    /// 注册本节点并组装协调组件；不启动任何循环
    pub async fn register(
        tasks: Arc<dyn TaskRepository>,
        storages: Arc<dyn StorageRepository>,
        config: StorageConfig,
    ) -> StorageResult<Self> {
        config.validate()?;

        let registry = Arc::new(Registry::register(Arc::clone(&storages)).await?);
        let shutdown = ShutdownManager::new();
        let (events, events_rx) = EventBus::new(config.event_channel_capacity);

        let refresher = Arc::new(Refresher::new(
            config.clone(),
            Arc::clone(&tasks),
            Arc::clone(&registry),
            events.clone(),
            shutdown.clone(),
        ));
        let preempter = Arc::new(Preempter::new(
            config.clone(),
            Arc::clone(&tasks),
            Arc::clone(&registry),
            Arc::clone(&refresher),
            events.clone(),
            shutdown.clone(),
        ));
        let lookup = Arc::new(Lookup::new(
            config.clone(),
            Arc::clone(&tasks),
            storages,
            Arc::clone(&registry),
            shutdown.clone(),
        ));

        Ok(Self {
            config,
            tasks,
            registry,
            refresher,
            preempter,
            lookup,
            events,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// 节点身份（由数据库分配）
    pub fn storage_id(&self) -> i64 {
        self.registry.storage_id()
    }

    /// 当前内存负载
    pub fn payload(&self) -> i32 {
        self.registry.payload()
    }

    /// 当前占有的任务 id 集合
    pub async fn owned_task_ids(&self) -> Vec<i64> {
        self.refresher.owned_ids().await
    }

    /// 启动抢占、均衡与负载持久化循环
    pub async fn start(&self) -> StorageResult<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(StorageError::Internal("节点已经启动".to_string()));
        }

        handles.push(tokio::spawn(
            Arc::clone(&self.registry).run_persist_loop(self.shutdown.subscribe()),
        ));
        handles.push(tokio::spawn(Arc::clone(&self.preempter).run()));
        handles.push(tokio::spawn(Arc::clone(&self.lookup).run()));

        info!("节点 {} 启动完成", self.storage_id());
        Ok(())
    }

    /// 新增任务，初始状态为 `Created`
    pub async fn add(&self, task: &TaskInfo) -> StorageResult<i64> {
        let now = now_millis();
        let mut record = task.clone();
        record.scheduler_status = SchedulerStatus::Created;
        record.occupier_id = 0;
        record.candidate_id = 0;
        record.epoch = 0;
        record.create_time = now;
        record.update_time = now;

        let task_id = self.tasks.create(&record).await?;
        record.id = task_id;

        self.events.publish(TaskEvent::created(record)).await;
        info!("新增任务: {}", task_id);
        Ok(task_id)
    }

    pub async fn get(&self, task_id: i64) -> StorageResult<Option<TaskInfo>> {
        self.tasks.get_by_id(task_id).await
    }

    /// 更新用户配置（name / cron / task_type / parameters）
    pub async fn update(&self, task: &TaskInfo) -> StorageResult<()> {
        self.tasks.update_definition(task).await
    }

    /// 删除任务
    ///
    /// 其他节点正占有的任务拒绝删除；删除本节点占有的任务会
    /// 停掉其续约循环并推送 `End` 事件。
    pub async fn delete(&self, task_id: i64) -> StorageResult<()> {
        let Some(task) = self.tasks.get_by_id(task_id).await? else {
            return Err(StorageError::TaskNotFound { id: task_id });
        };
        if task.is_preempted() && task.occupier_id != self.storage_id() {
            return Err(StorageError::TaskOccupied {
                id: task_id,
                occupier_id: task.occupier_id,
            });
        }

        let owned = self.refresher.forget(task_id).await;
        self.tasks.delete(task_id).await?;
        if owned {
            self.registry.bump_payload(-1);
        }

        let mut snapshot = task;
        snapshot.scheduler_status = SchedulerStatus::End;
        snapshot.occupier_id = 0;
        snapshot.candidate_id = 0;
        snapshot.update_time = now_millis();
        self.events.publish(TaskEvent::end(snapshot)).await;

        info!("删除任务: {}", task_id);
        Ok(())
    }

    /// 让出本节点占有的任务（执行器观察到候选者后调用）
    ///
    /// 行降级为 `Discarded` 且保留 `candidate_id`，候选节点的抢占器
    /// 将通过定向让渡分支认领。返回 `false` 表示本节点已不占有该任务。
    pub async fn release(&self, task_id: i64) -> StorageResult<bool> {
        let Some(task) = self.tasks.get_by_id(task_id).await? else {
            return Ok(false);
        };
        let demoted = self.tasks.discard(task_id, self.storage_id()).await?;
        if !demoted {
            return Ok(false);
        }

        if self.refresher.forget(task_id).await {
            self.registry.bump_payload(-1);
        }

        let mut snapshot = task;
        snapshot.scheduler_status = SchedulerStatus::Discarded;
        snapshot.occupier_id = 0;
        snapshot.update_time = now_millis();
        self.events.publish(TaskEvent::discarded(snapshot)).await;

        info!("让出任务: {}", task_id);
        Ok(true)
    }

    /// 终结任务生命周期（任意状态 → `End`）
    pub async fn finish(&self, task_id: i64) -> StorageResult<bool> {
        let Some(task) = self.tasks.get_by_id(task_id).await? else {
            return Ok(false);
        };
        let ended = self.tasks.mark_end(task_id).await?;
        if !ended {
            return Ok(false);
        }

        if self.refresher.forget(task_id).await {
            self.registry.bump_payload(-1);
        }

        let mut snapshot = task;
        snapshot.scheduler_status = SchedulerStatus::End;
        snapshot.occupier_id = 0;
        snapshot.candidate_id = 0;
        snapshot.update_time = now_millis();
        self.events.publish(TaskEvent::end(snapshot)).await;

        info!("终结任务: {}", task_id);
        Ok(true)
    }

    /// 取走事件接收端；只能取走一次
    pub async fn take_events(&self) -> Option<mpsc::Receiver<TaskEvent>> {
        self.events_rx.lock().await.take()
    }

    /// 优雅停止
    ///
    /// 广播关闭信号，在期限内等待全部循环退出，随后尽力删除节点行
    /// 并关闭事件通道。删除节点行失败只记录：孤儿行由过期租约规则自愈。
    pub async fn stop(&self, timeout: Duration) -> StorageResult<()> {
        info!("节点 {} 开始停止", self.storage_id());
        self.shutdown.shutdown();

        let mut handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        handles.extend(self.refresher.drain_handles().await);

        let deadline = std::time::Instant::now() + timeout;
        let mut timed_out = false;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if timed_out || tokio::time::timeout(remaining, &mut handle).await.is_err() {
                timed_out = true;
                handle.abort();
            }
        }

        if let Err(e) = self.registry.deregister().await {
            warn!("删除节点行失败: {}", e);
        }
        self.events.close().await;

        if timed_out {
            return Err(StorageError::ShutdownTimeout(format!(
                "{}ms 内未能等到全部循环退出",
                timeout.as_millis()
            )));
        }
        info!("节点 {} 已停止", self.storage_id());
        Ok(())
    }

    /// 按配置的默认期限停止
    pub async fn stop_with_default_timeout(&self) -> StorageResult<()> {
        self.stop(self.config.stop_timeout()).await
    }
}
