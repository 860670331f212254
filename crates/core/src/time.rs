//! 时间工具函数
//!
//! 所有持久化时间戳统一使用 unix 毫秒。

use chrono::Utc;

/// 获取当前unix毫秒时间戳
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
