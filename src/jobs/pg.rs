//! PostgreSQL job repository
//!
//! Pending rows double as the durable queue: `claim_next` uses a single
//! `UPDATE ... RETURNING` with `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never claim the same job. All timestamps come from the
//! database clock.

use super::repository::JobRepository;
use super::StorageError;
use crate::config::defaults;
use crate::types::{JobFailure, JobRecord, JobStatus, JobSummary, Priority};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Connections needed besides the worker claim/progress pair: API status
/// reads, counter increments, the retention sweeper, and the health probe.
const SERVICE_CONNECTIONS: u32 = 8;

/// Pool size for a service running `workers` generation workers. Each
/// worker holds at most a claim connection and a progress connection at
/// once; the remainder serves the HTTP and background paths.
pub fn pool_size(workers: usize) -> u32 {
    (workers as u32 * 2 + SERVICE_CONNECTIONS).min(32)
}

/// Open the durable store and bring the job/key schema current.
///
/// The acquire deadline is the per-operation storage deadline: a stalled
/// pool surfaces as `STORAGE_ERROR` on the affected request instead of
/// hanging a worker or handler indefinitely.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(defaults::STORE_OP_DEADLINE_SECS))
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StorageError::Database(format!("schema migration failed: {e}")))?;

    info!(max_connections, "Job and key store ready");
    Ok(pool)
}

/// Row tuple shared by every SELECT/RETURNING in this module
type JobRow = (
    Uuid,                      // id
    String,                    // tenant_key_id
    String,                    // status
    i32,                       // progress
    String,                    // phase_description
    i32,                       // priority_rank
    DateTime<Utc>,             // created_at
    DateTime<Utc>,             // updated_at
    Option<DateTime<Utc>>,     // completed_at
    serde_json::Value,         // config_json
    serde_json::Value,         // output_files_json
    Option<serde_json::Value>, // error_json
    Option<serde_json::Value>, // summary_json
    bool,                      // cancel_requested
    bool,                      // deleted
    bool,                      // partial
);

const JOB_COLUMNS: &str = "id, tenant_key_id, status, progress, phase_description, priority_rank, \
     created_at, updated_at, completed_at, config_json, output_files_json, \
     error_json, summary_json, cancel_requested, deleted, partial";

pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn priority_from_rank(rank: i32) -> Priority {
    match rank {
        0 => Priority::High,
        2 => Priority::Low,
        _ => Priority::Normal,
    }
}

fn record_from_row(row: JobRow) -> Result<JobRecord, StorageError> {
    let (
        id,
        tenant,
        status,
        progress,
        phase_description,
        priority_rank,
        created_at,
        updated_at,
        completed_at,
        config,
        output_files,
        error,
        summary,
        cancel_requested,
        deleted,
        partial,
    ) = row;
    Ok(JobRecord {
        id,
        tenant,
        status: JobStatus::parse(&status).unwrap_or_default(),
        progress: progress.clamp(0, 100) as u8,
        phase_description,
        priority: priority_from_rank(priority_rank),
        created_at,
        updated_at,
        completed_at,
        config,
        output_files: serde_json::from_value(output_files)?,
        error: error.map(serde_json::from_value).transpose()?,
        summary: summary.map(serde_json::from_value).transpose()?,
        cancel_requested,
        deleted,
        partial,
    })
}

/// Statuses allowed to precede `next` in the state machine
fn allowed_predecessors(next: JobStatus) -> Vec<String> {
    let allowed: &[JobStatus] = match next {
        JobStatus::Running => &[JobStatus::Pending],
        JobStatus::Completed | JobStatus::Failed => &[JobStatus::Running],
        JobStatus::Cancelled => &[JobStatus::Pending, JobStatus::Running],
        JobStatus::Pending => &[],
    };
    allowed.iter().map(|s| s.code().to_string()).collect()
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn insert(&self, job: &JobRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO jobs (id, tenant_key_id, status, progress, phase_description, \
             priority_rank, created_at, updated_at, config_json, output_files_json, \
             cancel_requested, deleted, partial) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW(), $7, $8, FALSE, FALSE, FALSE)",
        )
        .bind(job.id)
        .bind(&job.tenant)
        .bind(job.status.code())
        .bind(job.progress as i32)
        .bind(&job.phase_description)
        .bind(job.priority.rank())
        .bind(&job.config)
        .bind(serde_json::to_value(&job.output_files)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StorageError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(record_from_row).transpose()
    }

    async fn list(
        &self,
        tenant: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobRecord>, StorageError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE tenant_key_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(tenant)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(record_from_row).collect()
    }

    async fn claim_next(&self) -> Result<Option<JobRecord>, StorageError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE jobs
            SET    status = 'running',
                   updated_at = NOW()
            WHERE  id = (
                SELECT id
                FROM   jobs
                WHERE  status = 'pending'
                  AND  cancel_requested = FALSE
                ORDER  BY priority_rank ASC, created_at ASC
                LIMIT  1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.map(record_from_row).transpose()
    }

    async fn update_progress(
        &self,
        id: Uuid,
        progress: u8,
        phase: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE jobs \
             SET progress = GREATEST(progress, $2), \
                 phase_description = $3, \
                 updated_at = NOW() \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(progress.min(100) as i32)
        .bind(phase)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition(
        &self,
        id: Uuid,
        next: JobStatus,
        error: Option<JobFailure>,
    ) -> Result<bool, StorageError> {
        let error_json = error.map(serde_json::to_value).transpose()?;
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, \
                 updated_at = NOW(), \
                 completed_at = CASE WHEN $3 THEN NOW() ELSE completed_at END, \
                 error_json = COALESCE($4, error_json) \
             WHERE id = $1 AND status = ANY($5)",
        )
        .bind(id)
        .bind(next.code())
        .bind(next.is_terminal())
        .bind(error_json)
        .bind(allowed_predecessors(next))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(job_id = %id, to = %next, "Ignoring illegal job transition");
            return Ok(false);
        }
        Ok(true)
    }

    async fn set_outputs(
        &self,
        id: Uuid,
        files: &[String],
        summary: &JobSummary,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE jobs \
             SET output_files_json = $2, summary_json = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(serde_json::to_value(files)?)
        .bind(serde_json::to_value(summary)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn request_cancel(&self, id: Uuid) -> Result<bool, StorageError> {
        // Pending jobs cancel immediately; running jobs get the flag and
        // cancel at the worker's next checkpoint
        let result = sqlx::query(
            "UPDATE jobs \
             SET cancel_requested = TRUE, \
                 status = CASE WHEN status = 'pending' THEN 'cancelled' ELSE status END, \
                 completed_at = CASE WHEN status = 'pending' THEN NOW() ELSE completed_at END, \
                 updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'running')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_requested(&self, id: Uuid) -> Result<bool, StorageError> {
        let flag: Option<(bool,)> =
            sqlx::query_as("SELECT cancel_requested FROM jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(flag.map(|(f,)| f).unwrap_or(false))
    }

    async fn set_partial(&self, id: Uuid, partial: bool) -> Result<(), StorageError> {
        sqlx::query("UPDATE jobs SET partial = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(partial)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail_orphans(&self) -> Result<u64, StorageError> {
        let error = serde_json::to_value(JobFailure::new(
            "GENERATION_ERROR",
            "orphaned: no worker owned this job at startup",
        ))?;
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = 'failed', error_json = $1, completed_at = NOW(), updated_at = NOW() \
             WHERE status = 'running'",
        )
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn sweep_expired(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, StorageError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs \
             SET deleted = TRUE, updated_at = NOW() \
             WHERE deleted = FALSE \
               AND status IN ('completed', 'failed', 'cancelled') \
               AND created_at < $1 \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(record_from_row).collect()
    }
}
