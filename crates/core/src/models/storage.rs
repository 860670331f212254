use serde::{Deserialize, Serialize};

use crate::time::now_millis;

/// 节点记录
///
/// 每个存活的调度节点在 storages 表中占一行，`id` 由数据库生成，
/// 作为节点在其生命周期内的稳定身份。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageInfo {
    pub id: i64,
    /// 节点自报负载：占有的任务数加上待定候选数
    pub payload: i32,
    pub create_time: i64,
    pub update_time: i64,
}

impl StorageInfo {
    pub fn new() -> Self {
        let now = now_millis();
        Self {
            id: 0, // 将由数据库生成
            payload: 0,
            create_time: now,
            update_time: now,
        }
    }
}

impl Default for StorageInfo {
    fn default() -> Self {
        Self::new()
    }
}
