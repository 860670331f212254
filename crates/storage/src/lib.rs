//! rcron 协调引擎
//!
//! 任意数量的节点通过共享数据库协调任务所有权：注册自身、竞争认领任务、
//! 周期续约租约、过载时提名更优节点接管。所有权变化以事件流推送给执行器。

pub mod database;
pub mod events;
pub mod lookup;
pub mod preempter;
pub mod refresher;
pub mod registry;
pub mod shutdown;
pub mod storage;

pub use database::postgres::{PostgresStorageRepository, PostgresTaskRepository};
pub use database::sqlite::{SqliteStorageRepository, SqliteTaskRepository};
pub use events::EventBus;
pub use lookup::Lookup;
pub use preempter::Preempter;
pub use refresher::Refresher;
pub use registry::Registry;
pub use shutdown::ShutdownManager;
pub use storage::Storage;
