use std::sync::Arc;

use rcron_core::time::now_millis;
use rcron_core::{SchedulerStatus, StorageConfig, TaskEvent, TaskRepository};
use tracing::{debug, warn};

use crate::events::EventBus;
use crate::refresher::Refresher;
use crate::registry::Registry;
use crate::shutdown::ShutdownManager;

/// 任务抢占器
///
/// 周期扫描可认领的任务：新建任务、定向让渡给本节点的被放弃任务、
/// 以及租约过期的任务。逐行发起条件认领；零行命中说明其他节点
/// 先行一步，静默跳过。认领成功后先推送 `Preempted` 事件，
/// 再把任务交给续约器。
pub struct Preempter {
    storage_id: i64,
    config: StorageConfig,
    tasks: Arc<dyn TaskRepository>,
    registry: Arc<Registry>,
    refresher: Arc<Refresher>,
    events: EventBus,
    shutdown: ShutdownManager,
}

impl Preempter {
    pub fn new(
        config: StorageConfig,
        tasks: Arc<dyn TaskRepository>,
        registry: Arc<Registry>,
        refresher: Arc<Refresher>,
        events: EventBus,
        shutdown: ShutdownManager,
    ) -> Self {
        Self {
            storage_id: registry.storage_id(),
            config,
            tasks,
            registry,
            refresher,
            events,
            shutdown,
        }
    }

    /// 抢占循环；出错的扫描批次放弃，等待下个周期重试
    pub async fn run(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.preempt_interval());

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("抢占循环退出");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("抢占扫描失败: {}", e);
                    }
                }
            }
        }
    }

    /// 执行一轮抢占扫描
    pub async fn tick(&self) -> rcron_core::StorageResult<()> {
        let stale_before = now_millis() - self.config.stale_threshold_ms();
        let batch = self
            .tasks
            .fetch_preemptable(self.storage_id, stale_before, self.config.preempt_batch)
            .await?;

        for task in batch {
            if self.shutdown.is_shutdown() {
                break;
            }

            let claimed = self
                .tasks
                .try_preempt(task.id, self.storage_id, task.epoch, task.scheduler_status)
                .await?;
            if !claimed {
                // 竞争失败，其他节点已经拿走
                continue;
            }

            self.registry.bump_payload(1);

            let mut snapshot = task;
            snapshot.scheduler_status = SchedulerStatus::Preempted;
            snapshot.occupier_id = self.storage_id;
            snapshot.candidate_id = 0;
            snapshot.epoch += 1;
            snapshot.update_time = now_millis();

            debug!("抢占任务成功: {} (epoch {})", snapshot.id, snapshot.epoch);

            // 事件先于续约器启动，执行器得以在租约开始计时前装好处理器
            self.events
                .publish(TaskEvent::preempted(snapshot.clone()))
                .await;
            self.refresher.watch(snapshot).await;
        }

        Ok(())
    }
}
