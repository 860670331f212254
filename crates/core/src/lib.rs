pub mod config;
pub mod errors;
pub mod models;
pub mod retry;
pub mod time;
pub mod traits;

pub use config::StorageConfig;
pub use errors::{StorageError, StorageResult};
pub use models::{SchedulerStatus, StorageInfo, TaskEvent, TaskEventType, TaskInfo};
pub use retry::{FixedIntervalRetry, RetryStrategy};
pub use traits::{StorageRepository, TaskRepository};
