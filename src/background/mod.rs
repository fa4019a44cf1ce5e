//! Background maintenance tasks
//!
//! - Retention sweeper: marks terminal jobs past the TTL as deleted and
//!   removes their output directories. Metadata survives for audit.
//! - Orphan recovery runs once at startup from `main` via
//!   [`crate::jobs::JobRepository::fail_orphans`].

use crate::config::ServiceConfig;
use crate::jobs::JobRepository;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Sweep interval (hourly)
const SWEEP_INTERVAL: Duration = Duration::from_secs(3_600);

/// Run the retention sweeper as a long-lived background task.
pub async fn run_retention_sweeper(repo: Arc<dyn JobRepository>, service: ServiceConfig) {
    info!(
        retention_days = service.retention_days,
        "Retention sweeper started"
    );

    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if let Err(e) = sweep_once(&repo, &service).await {
            error!(error = %e, "Retention sweep failed");
        }
    }
}

/// One sweep pass: mark expired rows deleted and remove their directories.
pub async fn sweep_once(
    repo: &Arc<dyn JobRepository>,
    service: &ServiceConfig,
) -> Result<usize, crate::jobs::StorageError> {
    let cutoff = Utc::now() - ChronoDuration::days(service.retention_days as i64);
    let expired = repo.sweep_expired(cutoff).await?;
    if expired.is_empty() {
        return Ok(0);
    }

    let mut removed = 0;
    for job in &expired {
        let dir = service.output_root.join(job.dir_name());
        if dir.exists() {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => removed += 1,
                Err(e) => warn!(job_id = %job.id, error = %e, "Could not remove expired job directory"),
            }
        }
    }
    info!(
        expired = expired.len(),
        removed, "Retention sweep removed expired job artifacts"
    );
    Ok(expired.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobRepository, MemoryJobRepository};
    use crate::types::{JobRecord, JobStatus, Priority};

    #[tokio::test]
    async fn sweep_removes_directories_of_expired_jobs() {
        let tmp = tempfile::tempdir().unwrap();
        let mut service = ServiceConfig::default();
        service.output_root = tmp.path().to_path_buf();
        service.retention_days = 7;

        let repo: Arc<dyn JobRepository> = Arc::new(MemoryJobRepository::new());
        let mut job = JobRecord::new_pending("t", Priority::Normal, serde_json::json!({}));
        job.created_at = Utc::now() - ChronoDuration::days(30);
        repo.insert(&job).await.unwrap();
        repo.claim_next().await.unwrap();
        repo.transition(job.id, JobStatus::Completed, None)
            .await
            .unwrap();

        let dir = tmp.path().join(job.dir_name());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("patients.json"), b"[]").unwrap();

        let swept = sweep_once(&repo, &service).await.unwrap();
        assert_eq!(swept, 1);
        assert!(!dir.exists());

        // Metadata survives with deleted = true
        let stored = repo.get(job.id).await.unwrap().unwrap();
        assert!(stored.deleted);
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn recent_jobs_are_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let mut service = ServiceConfig::default();
        service.output_root = tmp.path().to_path_buf();

        let repo: Arc<dyn JobRepository> = Arc::new(MemoryJobRepository::new());
        let job = JobRecord::new_pending("t", Priority::Normal, serde_json::json!({}));
        repo.insert(&job).await.unwrap();
        repo.claim_next().await.unwrap();
        repo.transition(job.id, JobStatus::Completed, None)
            .await
            .unwrap();

        let swept = sweep_once(&repo, &service).await.unwrap();
        assert_eq!(swept, 0);
        assert!(!repo.get(job.id).await.unwrap().unwrap().deleted);
    }
}
