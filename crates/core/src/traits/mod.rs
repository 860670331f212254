pub mod repository;

pub use repository::{StorageRepository, TaskRepository};
