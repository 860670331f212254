pub mod sqlite_storage_repository;
pub mod sqlite_task_repository;

pub use sqlite_storage_repository::SqliteStorageRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
