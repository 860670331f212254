use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use rcron_core::time::now_millis;
use rcron_core::{StorageRepository, StorageResult};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

/// 节点注册与负载上报
///
/// 负载计数在内存中用原子整数维护，由抢占器（+）、续约器（−）和
/// 提名（+）修改；持久化由单个后台循环串行执行，写入的总是最新值，
/// 因此表中的负载最终与内存一致。短暂偏差可接受：均衡决策只是启发式。
pub struct Registry {
    storage_id: i64,
    payload: AtomicI32,
    repo: Arc<dyn StorageRepository>,
    dirty: Notify,
}

impl Registry {
    /// 在节点表中注册本节点，payload 初始为 0
    pub async fn register(repo: Arc<dyn StorageRepository>) -> StorageResult<Self> {
        let storage_id = repo.register(now_millis()).await?;
        info!("节点注册完成: {}", storage_id);
        Ok(Self {
            storage_id,
            payload: AtomicI32::new(0),
            repo,
            dirty: Notify::new(),
        })
    }

    pub fn storage_id(&self) -> i64 {
        self.storage_id
    }

    /// 当前内存负载
    pub fn payload(&self) -> i32 {
        self.payload.load(Ordering::SeqCst)
    }

    /// 调整负载并唤醒持久化循环，返回新值
    pub fn bump_payload(&self, delta: i32) -> i32 {
        let new = self.payload.fetch_add(delta, Ordering::SeqCst) + delta;
        if new < 0 {
            warn!("节点 {} 负载计数为负: {}", self.storage_id, new);
        }
        self.dirty.notify_one();
        new
    }

    /// 把当前内存负载写入节点行
    pub async fn flush(&self) -> StorageResult<()> {
        let payload = self.payload();
        self.repo
            .update_payload(self.storage_id, payload, now_millis())
            .await?;
        debug!("持久化节点 {} 负载: {}", self.storage_id, payload);
        Ok(())
    }

    /// 持久化循环：被 `bump_payload` 唤醒，串行写入最新负载
    pub async fn run_persist_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = self.dirty.notified() => {
                    if let Err(e) = self.flush().await {
                        warn!("持久化节点负载失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    if let Err(e) = self.flush().await {
                        warn!("停止前持久化节点负载失败: {}", e);
                    }
                    debug!("负载持久化循环退出");
                    break;
                }
            }
        }
    }

    /// 删除节点行；失败只记录，孤儿行由过期租约规则自愈
    pub async fn deregister(&self) -> StorageResult<()> {
        self.repo.deregister(self.storage_id).await
    }
}
