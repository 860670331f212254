use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{StorageError, StorageResult};
use crate::retry::FixedIntervalRetry;

/// 协调核心配置
///
/// 所有周期字段统一使用毫秒。租约过期阈值为
/// `refresh_retry_max * refresh_interval_ms`：占有者超过该时长未续约，
/// 任务即可被任意节点重新抢占。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 抢占扫描周期
    pub preempt_interval_ms: u64,
    /// 每个占有任务的续约周期
    pub refresh_interval_ms: u64,
    /// 连续续约失败容忍次数，超过即放弃任务
    pub refresh_retry_max: u32,
    /// 续约失败后的重试间隔
    pub refresh_retry_interval_ms: u64,
    /// 负载均衡扫描周期，应明显慢于续约周期
    pub lookup_interval_ms: u64,
    /// 单次抢占扫描的行数上限
    pub preempt_batch: i64,
    /// 单次均衡扫描的行数上限
    pub lookup_batch: i64,
    /// 事件通道容量；消费者迟滞时生产者阻塞
    pub event_channel_capacity: usize,
    /// 默认优雅停止等待时长
    pub stop_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            preempt_interval_ms: 2000,
            refresh_interval_ms: 5000,
            refresh_retry_max: 3,
            refresh_retry_interval_ms: 1000,
            lookup_interval_ms: 10000,
            preempt_batch: 10,
            lookup_batch: 10,
            event_channel_capacity: 64,
            stop_timeout_ms: 10000,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> StorageResult<()> {
        if self.preempt_interval_ms == 0 {
            return Err(StorageError::config_error("preempt_interval_ms 不能为 0"));
        }
        if self.refresh_interval_ms == 0 {
            return Err(StorageError::config_error("refresh_interval_ms 不能为 0"));
        }
        if self.refresh_retry_max == 0 {
            return Err(StorageError::config_error("refresh_retry_max 不能为 0"));
        }
        if self.refresh_retry_interval_ms == 0 {
            return Err(StorageError::config_error(
                "refresh_retry_interval_ms 不能为 0",
            ));
        }
        if self.lookup_interval_ms == 0 {
            return Err(StorageError::config_error("lookup_interval_ms 不能为 0"));
        }
        if self.preempt_batch <= 0 || self.lookup_batch <= 0 {
            return Err(StorageError::config_error("扫描批量必须大于 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(StorageError::config_error(
                "event_channel_capacity 不能为 0",
            ));
        }
        Ok(())
    }

    pub fn preempt_interval(&self) -> Duration {
        Duration::from_millis(self.preempt_interval_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn lookup_interval(&self) -> Duration {
        Duration::from_millis(self.lookup_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// 租约过期阈值（毫秒）
    pub fn stale_threshold_ms(&self) -> i64 {
        self.refresh_retry_max as i64 * self.refresh_interval_ms as i64
    }

    /// 按配置构造默认的固定间隔续约重试策略
    pub fn refresh_retry(&self) -> FixedIntervalRetry {
        FixedIntervalRetry::new(
            Duration::from_millis(self.refresh_retry_interval_ms),
            self.refresh_retry_max,
        )
    }
}
