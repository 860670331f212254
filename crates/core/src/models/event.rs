//! 所有权转移事件
//!
//! 节点每引发一次任务所有权变化，就向执行器推送一条事件。
//! 事件流只传递状态转移，不传递错误。

use serde::{Deserialize, Serialize};

use super::task::TaskInfo;

/// 事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskEventType {
    /// 任务新建完成
    Created,
    /// 本节点抢占到任务
    Preempted,
    /// 本节点放弃任务（续约耗尽或主动让出）
    Discarded,
    /// 任务生命周期终止
    End,
}

/// 任务所有权转移事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event_type: TaskEventType,
    /// 转移发生时的任务快照
    pub task: TaskInfo,
}

impl TaskEvent {
    pub fn created(task: TaskInfo) -> Self {
        Self {
            event_type: TaskEventType::Created,
            task,
        }
    }

    pub fn preempted(task: TaskInfo) -> Self {
        Self {
            event_type: TaskEventType::Preempted,
            task,
        }
    }

    pub fn discarded(task: TaskInfo) -> Self {
        Self {
            event_type: TaskEventType::Discarded,
            task,
        }
    }

    pub fn end(task: TaskInfo) -> Self {
        Self {
            event_type: TaskEventType::End,
            task,
        }
    }

    pub fn task_id(&self) -> i64 {
        self.task.id
    }
}
