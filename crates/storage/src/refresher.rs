use std::collections::HashMap;
use std::sync::Arc;

use rcron_core::time::now_millis;
use rcron_core::{
    RetryStrategy, SchedulerStatus, StorageConfig, TaskEvent, TaskInfo, TaskRepository,
};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};

use crate::events::EventBus;
use crate::registry::Registry;
use crate::shutdown::ShutdownManager;

/// 单次续约周期的结果
enum TickResult {
    /// 续约成功，epoch 已推进
    Refreshed,
    /// 占有者已变更，租约被让渡或抢走
    LeaseLost,
    /// 连续失败达到上限
    Exhausted,
    /// 收到关闭信号
    Shutdown,
}

/// 租约续约器
///
/// 每个占有的任务对应一个独立的续约循环，循环内的续约严格串行；
/// 不同任务之间并行。续约失败在预算内重试；预算耗尽后自降级为
/// `Discarded` 并推送事件。关闭时循环在下一个挂起点退出，
/// 租约留待自然过期。
pub struct Refresher {
    storage_id: i64,
    config: StorageConfig,
    tasks: Arc<dyn TaskRepository>,
    registry: Arc<Registry>,
    events: EventBus,
    shutdown: ShutdownManager,
    owned: Arc<Mutex<HashMap<i64, JoinHandle<()>>>>,
}

impl Refresher {
    pub fn new(
        config: StorageConfig,
        tasks: Arc<dyn TaskRepository>,
        registry: Arc<Registry>,
        events: EventBus,
        shutdown: ShutdownManager,
    ) -> Self {
        Self {
            storage_id: registry.storage_id(),
            config,
            tasks,
            registry,
            events,
            shutdown,
            owned: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 为已抢占到的任务启动续约循环
    ///
    /// 调用方必须先推送 `Preempted` 事件再调用本方法。
    pub async fn watch(&self, task: TaskInfo) {
        let mut owned = self.owned.lock().await;
        if owned.contains_key(&task.id) {
            warn!("任务 {} 已在续约中，跳过重复注册", task.id);
            return;
        }

        let task_id = task.id;
        let handle = tokio::spawn(Self::refresh_loop(
            task,
            self.storage_id,
            self.config.clone(),
            Arc::clone(&self.tasks),
            Arc::clone(&self.registry),
            self.events.clone(),
            self.shutdown.clone(),
            Arc::clone(&self.owned),
        ));
        owned.insert(task_id, handle);
        debug!("任务 {} 开始续约", task_id);
    }

    /// 停止并移除指定任务的续约循环；返回该任务此前是否在续约
    pub async fn forget(&self, task_id: i64) -> bool {
        match self.owned.lock().await.remove(&task_id) {
            Some(handle) => {
                handle.abort();
                debug!("任务 {} 停止续约", task_id);
                true
            }
            None => false,
        }
    }

    /// 当前占有的任务 id 集合
    pub async fn owned_ids(&self) -> Vec<i64> {
        self.owned.lock().await.keys().copied().collect()
    }

    /// 取走全部续约循环句柄，供停止流程等待
    pub async fn drain_handles(&self) -> Vec<JoinHandle<()>> {
        self.owned.lock().await.drain().map(|(_, h)| h).collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn refresh_loop(
        mut task: TaskInfo,
        storage_id: i64,
        config: StorageConfig,
        tasks: Arc<dyn TaskRepository>,
        registry: Arc<Registry>,
        events: EventBus,
        shutdown: ShutdownManager,
        owned: Arc<Mutex<HashMap<i64, JoinHandle<()>>>>,
    ) {
        let mut shutdown_rx = shutdown.subscribe();
        let mut retry = config.refresh_retry();
        let mut ticker = interval(config.refresh_interval());
        // interval 的首个 tick 立即完成，消费掉以保证首次续约发生在一个完整周期之后
        ticker.tick().await;

        let outcome = loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break TickResult::Shutdown,
                _ = ticker.tick() => {}
            }

            match Self::refresh_once(
                &mut task,
                storage_id,
                &tasks,
                &mut retry,
                &mut shutdown_rx,
            )
            .await
            {
                TickResult::Refreshed => continue,
                other => break other,
            }
        };

        match outcome {
            TickResult::LeaseLost => {
                // 任务被让渡或被抢走，静默放弃，不发事件
                info!("任务 {} 的租约已转移，放弃续约", task.id);
                registry.bump_payload(-1);
            }
            TickResult::Exhausted => {
                // 先降级数据库行，再推送事件
                match tasks.discard(task.id, storage_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("任务 {} 降级时发现占有者已变更", task.id);
                    }
                    Err(e) => {
                        warn!("任务 {} 降级写入失败: {}", task.id, e);
                    }
                }
                registry.bump_payload(-1);

                let mut snapshot = task.clone();
                snapshot.scheduler_status = SchedulerStatus::Discarded;
                snapshot.occupier_id = 0;
                snapshot.update_time = now_millis();
                events.publish(TaskEvent::discarded(snapshot)).await;
                info!("任务 {} 续约预算耗尽，已放弃", task.id);
            }
            TickResult::Shutdown => {
                // 租约留待自然过期，不改任何计数
                debug!("任务 {} 的续约循环随节点停止退出", task.id);
            }
            TickResult::Refreshed => unreachable!(),
        }

        owned.lock().await.remove(&task.id);
    }

    /// 执行一个续约周期，失败时按重试策略在周期内串行重试
    async fn refresh_once(
        task: &mut TaskInfo,
        storage_id: i64,
        tasks: &Arc<dyn TaskRepository>,
        retry: &mut impl RetryStrategy,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> TickResult {
        loop {
            match tasks.refresh_lease(task.id, storage_id, task.epoch).await {
                Ok(true) => {
                    task.epoch += 1;
                    task.update_time = now_millis();
                    retry.reset();
                    return TickResult::Refreshed;
                }
                Ok(false) => {
                    // 零行命中且无传输错误：回读区分“租约丢失”与“临时失败”
                    match tasks.get_by_id(task.id).await {
                        Ok(Some(current)) if current.occupier_id != storage_id => {
                            return TickResult::LeaseLost;
                        }
                        Ok(None) => return TickResult::LeaseLost,
                        Ok(Some(_)) => {
                            debug!("任务 {} 续约未命中但仍属本节点，计入失败", task.id);
                        }
                        Err(e) => {
                            debug!("任务 {} 续约后回读失败: {}", task.id, e);
                        }
                    }
                }
                Err(e) => {
                    debug!("任务 {} 续约失败: {}", task.id, e);
                }
            }

            match retry.next() {
                Some(delay) => {
                    tokio::select! {
                        _ = shutdown_rx.recv() => return TickResult::Shutdown,
                        _ = sleep(delay) => {}
                    }
                }
                None => return TickResult::Exhausted,
            }
        }
    }
}
