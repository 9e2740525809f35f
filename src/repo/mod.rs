//! Durable persistence interfaces consumed by the scheduler.
//!
//! The core only depends on these narrow traits (per spec §1, the
//! persistence backend itself is out of scope); `sqlite.rs` is the one
//! concrete implementation this crate ships.

pub mod sqlite;

pub use sqlite::{SqliteTaskLogRepo, SqliteTaskRepo};

use crate::error::Result;
use crate::task::{TaskLog, TaskRecord};
use async_trait::async_trait;

/// Durable CRUD over [`TaskRecord`]s, keyed by `(owner_name, id)`.
#[async_trait]
pub trait TaskRepo: Send + Sync {
    /// Fails with `RepoError::DuplicateKey` if `record.id` already exists.
    async fn create(&self, record: TaskRecord) -> Result<()>;

    /// Fails with `RepoError::NotFound` if `(owner_name, id)` is absent.
    async fn delete(&self, owner_name: &str, id: &str) -> Result<()>;

    async fn list_by_owner(&self, owner_name: &str) -> Result<Vec<TaskRecord>>;

    /// Used only by `initializeTasks` on startup.
    async fn list_all(&self) -> Result<Vec<TaskRecord>>;
}

/// Append-only store of one row per fire.
#[async_trait]
pub trait TaskLogRepo: Send + Sync {
    async fn create(&self, log: TaskLog) -> Result<()>;
}
