//! Job controller & repository
//!
//! Jobs move through `pending -> running -> {completed, failed, cancelled}`
//! (pending may also cancel directly). The repository row is the single
//! source of truth; workers claim pending rows, stream patients to the
//! job's output directory, and transition the row at checkpoints.
//!
//! ## Modules
//!
//! - `repository` — the [`JobRepository`] contract
//! - `memory` — in-process store for single-process dev and tests
//!   (non-durable: state dies with the process)
//! - `pg` — PostgreSQL store, `FOR UPDATE SKIP LOCKED` claims
//! - `worker` — bounded worker pool executing claimed jobs

pub mod memory;
pub mod pg;
pub mod repository;
pub mod worker;

pub use memory::MemoryJobRepository;
pub use pg::PgJobRepository;
pub use repository::JobRepository;
pub use worker::{run_worker_pool, WorkerContext};

use thiserror::Error;

/// Durable-store failures surfaced as `STORAGE_ERROR` at the API layer
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage I/O error: {0}")]
    Io(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
