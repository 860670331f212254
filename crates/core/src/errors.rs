use thiserror::Error;

/// 协调核心统一错误类型
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },
    #[error("任务 {id} 正被节点 {occupier_id} 占有，拒绝操作")]
    TaskOccupied { id: i64, occupier_id: i64 },
    #[error("节点注册失败: {0}")]
    Registration(String),
    #[error("事件通道已关闭")]
    EventChannelClosed,
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("停止超时: {0}")]
    ShutdownTimeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }

    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound { id }
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 致命错误：不应在循环内重试，直接上抛给调用方
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StorageError::Configuration(_)
                | StorageError::ShutdownTimeout(_)
                | StorageError::Internal(_)
        )
    }

    /// 可重试错误：计入续约失败预算，不对外暴露
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Database(_) | StorageError::DatabaseOperation(_)
        )
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(StorageError::Configuration("bad".to_string()).is_fatal());
        assert!(!StorageError::Configuration("bad".to_string()).is_retryable());
        assert!(StorageError::DatabaseOperation("timeout".to_string()).is_retryable());
        assert!(!StorageError::TaskNotFound { id: 1 }.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::TaskOccupied {
            id: 7,
            occupier_id: 3,
        };
        assert!(err.to_string().contains('7'));
        assert!(err.to_string().contains('3'));
    }
}
