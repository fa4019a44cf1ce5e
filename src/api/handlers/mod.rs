//! HTTP route handlers, one module per endpoint group

pub mod downloads;
pub mod generation;
pub mod health;
pub mod jobs;
pub mod timeline;

use crate::types::{JobFailure, JobRecord, JobStatus, JobSummary, Priority};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Job projection returned by the status endpoints
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub phase_description: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub output_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<JobSummary>,
    /// Seconds until completion, estimated from the progress rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion_seconds: Option<u64>,
    pub partial: bool,
}

impl JobView {
    pub fn from_record(job: &JobRecord) -> Self {
        Self {
            id: job.id.to_string(),
            status: job.status,
            progress: job.progress,
            phase_description: job.phase_description.clone(),
            priority: job.priority,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
            output_files: job.output_files.clone(),
            error: job.error.clone(),
            summary: job.summary.clone(),
            estimated_completion_seconds: estimate_remaining(job),
            partial: job.partial,
        }
    }
}

/// Remaining seconds from the observed progress rate; `None` until the
/// job is running and past initialization.
fn estimate_remaining(job: &JobRecord) -> Option<u64> {
    if job.status != JobStatus::Running || job.progress < 5 {
        return None;
    }
    let elapsed = (Utc::now() - job.created_at).num_seconds().max(1) as f64;
    let rate = job.progress as f64 / elapsed;
    if rate <= 0.0 {
        return None;
    }
    Some(((100 - job.progress) as f64 / rate) as u64)
}
