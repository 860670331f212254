pub mod postgres_storage_repository;
pub mod postgres_task_repository;

pub use postgres_storage_repository::PostgresStorageRepository;
pub use postgres_task_repository::PostgresTaskRepository;
