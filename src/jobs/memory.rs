//! In-memory job repository
//!
//! Single-process development store. NOT durable: every record dies with
//! the process, so `fail_orphans` is a no-op (a restart forgets running
//! jobs instead of observing them). Production deployments use
//! [`super::PgJobRepository`].

use super::repository::JobRepository;
use super::StorageError;
use crate::types::{JobFailure, JobRecord, JobStatus, JobSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn insert(&self, job: &JobRecord) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StorageError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&id).cloned())
    }

    async fn list(
        &self,
        tenant: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobRecord>, StorageError> {
        let jobs = self.jobs.read().await;
        let mut owned: Vec<JobRecord> = jobs
            .values()
            .filter(|j| j.tenant == tenant)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn claim_next(&self) -> Result<Option<JobRecord>, StorageError> {
        let mut jobs = self.jobs.write().await;
        let next_id = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| (j.priority.rank(), j.created_at))
            .map(|j| j.id);
        let Some(id) = next_id else {
            return Ok(None);
        };
        let job = jobs.get_mut(&id).ok_or_else(|| {
            StorageError::Database("claimed job vanished".to_string())
        })?;
        job.status = JobStatus::Running;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn update_progress(
        &self,
        id: Uuid,
        progress: u8,
        phase: &str,
    ) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            if job.status == JobStatus::Running {
                job.progress = job.progress.max(progress.min(100));
                job.phase_description = phase.to_string();
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn transition(
        &self,
        id: Uuid,
        next: JobStatus,
        error: Option<JobFailure>,
    ) -> Result<bool, StorageError> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !job.status.can_transition_to(next) {
            warn!(job_id = %id, from = %job.status, to = %next, "Ignoring illegal job transition");
            return Ok(false);
        }
        job.status = next;
        job.updated_at = Utc::now();
        if next.is_terminal() {
            job.completed_at = Some(job.updated_at);
        }
        if let Some(failure) = error {
            job.error = Some(failure);
        }
        Ok(true)
    }

    async fn set_outputs(
        &self,
        id: Uuid,
        files: &[String],
        summary: &JobSummary,
    ) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            job.output_files = files.to_vec();
            job.summary = Some(summary.clone());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn request_cancel(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status.is_terminal() {
            return Ok(false);
        }
        job.cancel_requested = true;
        job.updated_at = Utc::now();
        // Pending jobs cancel immediately; running jobs cancel at the
        // worker's next checkpoint
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(job.updated_at);
        }
        Ok(true)
    }

    async fn cancel_requested(&self, id: Uuid) -> Result<bool, StorageError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&id).map(|j| j.cancel_requested).unwrap_or(false))
    }

    async fn set_partial(&self, id: Uuid, partial: bool) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            job.partial = partial;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail_orphans(&self) -> Result<u64, StorageError> {
        // Nothing survives a restart here, so there is nothing to orphan
        Ok(0)
    }

    async fn sweep_expired(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, StorageError> {
        let mut jobs = self.jobs.write().await;
        let mut swept = Vec::new();
        for job in jobs.values_mut() {
            if !job.deleted && job.status.is_terminal() && job.created_at < cutoff {
                job.deleted = true;
                job.updated_at = Utc::now();
                swept.push(job.clone());
            }
        }
        Ok(swept)
    }
}
