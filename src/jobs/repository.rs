//! Job repository contract
//!
//! Two implementations exist: the PostgreSQL store (preferred — pending
//! rows double as the durable queue) and an in-memory store for
//! single-process development. All mutations are scoped by job id.

use super::StorageError;
use crate::types::{JobFailure, JobRecord, JobStatus, JobSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a fresh pending record.
    async fn insert(&self, job: &JobRecord) -> Result<(), StorageError>;

    /// Fetch a job by id, including deleted records (audit queries).
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StorageError>;

    /// Jobs owned by a tenant, newest first.
    async fn list(
        &self,
        tenant: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobRecord>, StorageError>;

    /// Atomically claim the next pending job, honoring priority order
    /// (high before normal before low, oldest first within a class).
    /// The claimed job is transitioned to `running`.
    async fn claim_next(&self) -> Result<Option<JobRecord>, StorageError>;

    /// Monotone progress update; regressions are clamped away.
    /// Only applies while the job is `running`.
    async fn update_progress(
        &self,
        id: Uuid,
        progress: u8,
        phase: &str,
    ) -> Result<(), StorageError>;

    /// Apply a state transition. Illegal transitions are ignored (and
    /// logged by the implementation); returns whether the row changed.
    async fn transition(
        &self,
        id: Uuid,
        next: JobStatus,
        error: Option<JobFailure>,
    ) -> Result<bool, StorageError>;

    /// Record the artifact filenames and completion summary.
    async fn set_outputs(
        &self,
        id: Uuid,
        files: &[String],
        summary: &JobSummary,
    ) -> Result<(), StorageError>;

    /// Raise the cooperative cancellation flag. Returns false when the
    /// job is unknown or already terminal.
    async fn request_cancel(&self, id: Uuid) -> Result<bool, StorageError>;

    /// Poll the cancellation flag; workers call this between batches.
    async fn cancel_requested(&self, id: Uuid) -> Result<bool, StorageError>;

    /// Mark a cancelled job's directory state as partially written.
    async fn set_partial(&self, id: Uuid, partial: bool) -> Result<(), StorageError>;

    /// Crash recovery: transition `running` rows with no live worker to
    /// `failed` ("orphaned"). Called once at startup before the pool.
    async fn fail_orphans(&self) -> Result<u64, StorageError>;

    /// Retention: mark jobs created before the cutoff as deleted and
    /// return them so the sweeper can remove their directories. Metadata
    /// survives for audit.
    async fn sweep_expired(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, StorageError>;
}
