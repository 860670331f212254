use std::sync::Arc;

use rcron_core::{StorageConfig, StorageRepository, TaskRepository};
use tracing::{debug, warn};

use crate::registry::Registry;
use crate::shutdown::ShutdownManager;

/// 负载均衡器
///
/// 周期扫描他人占有的任务，当本节点比占有者轻、且比现任候选者更轻时，
/// 把自己安插为候选者。本循环从不改动 `occupier_id`；最终交接由
/// 执行器驱动占有者让出后，经抢占器的定向让渡分支完成。
pub struct Lookup {
    storage_id: i64,
    config: StorageConfig,
    tasks: Arc<dyn TaskRepository>,
    storages: Arc<dyn StorageRepository>,
    registry: Arc<Registry>,
    shutdown: ShutdownManager,
}

impl Lookup {
    pub fn new(
        config: StorageConfig,
        tasks: Arc<dyn TaskRepository>,
        storages: Arc<dyn StorageRepository>,
        registry: Arc<Registry>,
        shutdown: ShutdownManager,
    ) -> Self {
        Self {
            storage_id: registry.storage_id(),
            config,
            tasks,
            storages,
            registry,
            shutdown,
        }
    }

    /// 均衡循环
    pub async fn run(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.lookup_interval());

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("均衡循环退出");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("均衡扫描失败: {}", e);
                    }
                }
            }
        }
    }

    /// 执行一轮均衡扫描
    ///
    /// 本节点负载读内存计数；占有者与候选者负载读节点表。
    pub async fn tick(&self) -> rcron_core::StorageResult<()> {
        let batch = self
            .tasks
            .fetch_balance_batch(self.storage_id, self.config.lookup_batch)
            .await?;

        for task in batch {
            if self.shutdown.is_shutdown() {
                break;
            }

            let self_payload = self.registry.payload();

            let Some(occupier_payload) = self.storages.get_payload(task.occupier_id).await? else {
                // 占有者节点行已消失，留给过期租约规则处理
                continue;
            };
            if self_payload >= occupier_payload {
                continue;
            }

            if task.candidate_id != 0 {
                // 现任候选者仍然在册且不比本节点重时，不做替换
                if let Some(candidate_payload) =
                    self.storages.get_payload(task.candidate_id).await?
                {
                    if self_payload >= candidate_payload {
                        continue;
                    }
                }
            }

            let nominated = self
                .tasks
                .nominate_candidate(task.id, self.storage_id, task.occupier_id, task.candidate_id)
                .await?;
            if nominated {
                // 候选身份计入负载
                self.registry.bump_payload(1);
                debug!(
                    "提名本节点为任务 {} 的候选者 (占有者 {})",
                    task.id, task.occupier_id
                );
            }
        }

        Ok(())
    }
}
