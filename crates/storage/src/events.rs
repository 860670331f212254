use std::sync::Arc;

use rcron_core::TaskEvent;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// 有界事件总线
///
/// 单消费者通道。缓冲写满时 `publish` 阻塞生产者：消费者迟滞时
/// 宁可停止获取新任务，也不丢弃所有权转移。
#[derive(Clone)]
pub struct EventBus {
    tx: Arc<Mutex<Option<mpsc::Sender<TaskEvent>>>>,
}

impl EventBus {
    /// 创建事件总线，返回总线与唯一的接收端
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TaskEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// 推送事件；通道已关闭时记录并丢弃
    pub async fn publish(&self, event: TaskEvent) {
        let tx = { self.tx.lock().await.clone() };
        match tx {
            Some(tx) => {
                let task_id = event.task_id();
                if tx.send(event).await.is_err() {
                    warn!("事件消费者已退出，丢弃任务 {} 的事件", task_id);
                }
            }
            None => {
                warn!("事件通道已关闭，丢弃任务 {} 的事件", event.task_id());
            }
        }
    }

    /// 关闭总线；已缓冲的事件仍会被消费端排空
    pub async fn close(&self) {
        if self.tx.lock().await.take().is_some() {
            debug!("事件通道已关闭");
        }
    }
}
