//! Timeline inspection handlers
//!
//! Serve per-patient timelines and aggregated statistics for completed
//! jobs, plus the currently active evacuation configuration. Patient
//! data is read back from the job's `patients.json`; the job record
//! reconstructs the directory path.

use crate::api::envelope::ApiErrorResponse;
use crate::api::{ApiKeyHeader, AppState};
use crate::output::json::read_patients;
use crate::types::JobStatus;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct PatientTimelineView {
    pub patient_id: u64,
    pub nationality: String,
    pub triage: crate::types::Triage,
    pub injury_type: crate::types::InjuryType,
    pub final_status: crate::types::FinalStatus,
    pub last_facility: crate::types::Facility,
    pub injury_timestamp: chrono::DateTime<chrono::Utc>,
    pub hours_to_outcome: f64,
    pub facilities_visited: Vec<String>,
    pub timeline: Vec<crate::types::TimelineEvent>,
}

/// GET /api/v1/timeline/jobs/{id}/patients/{pid}
pub async fn patient_timeline(
    State(state): State<Arc<AppState>>,
    ApiKeyHeader(raw_key): ApiKeyHeader,
    Path((id, pid)): Path<(Uuid, u64)>,
) -> Response {
    let key = match state.auth.authenticate(&raw_key).await {
        Ok(key) => key,
        Err(err) => return ApiErrorResponse::from_admission(err),
    };
    let job = match state.repo.get(id).await {
        Ok(Some(job)) if job.tenant == key.id => job,
        Ok(_) => return ApiErrorResponse::not_found("unknown job"),
        Err(e) => return ApiErrorResponse::storage(e.to_string()),
    };
    if job.status != JobStatus::Completed || job.deleted {
        return ApiErrorResponse::not_found("job has no patient data");
    }

    let path = state
        .service
        .output_root
        .join(job.dir_name())
        .join("patients.json");
    let patients = match read_patients(&path) {
        Ok(patients) => patients,
        Err(_) => return ApiErrorResponse::not_found("patient data missing on disk"),
    };

    match patients.into_iter().find(|p| p.id == pid) {
        Some(patient) => Json(PatientTimelineView {
            patient_id: patient.id,
            nationality: patient.nationality.clone(),
            triage: patient.triage,
            injury_type: patient.injury_type,
            final_status: patient.final_status,
            last_facility: patient.last_facility,
            injury_timestamp: patient.injury_timestamp,
            hours_to_outcome: patient.hours_to_outcome(),
            facilities_visited: patient
                .facilities_visited()
                .iter()
                .map(|f| f.code().to_string())
                .collect(),
            timeline: patient.timeline,
        })
        .into_response(),
        None => ApiErrorResponse::not_found(format!("no patient {pid} in job")),
    }
}

/// GET /api/v1/timeline/jobs/{id}/statistics — the completion summary
pub async fn job_statistics(
    State(state): State<Arc<AppState>>,
    ApiKeyHeader(raw_key): ApiKeyHeader,
    Path(id): Path<Uuid>,
) -> Response {
    let key = match state.auth.authenticate(&raw_key).await {
        Ok(key) => key,
        Err(err) => return ApiErrorResponse::from_admission(err),
    };
    let job = match state.repo.get(id).await {
        Ok(Some(job)) if job.tenant == key.id => job,
        Ok(_) => return ApiErrorResponse::not_found("unknown job"),
        Err(e) => return ApiErrorResponse::storage(e.to_string()),
    };
    match job.summary {
        Some(summary) if job.status == JobStatus::Completed => {
            Json(summary).into_response()
        }
        _ => ApiErrorResponse::not_found("job has no statistics yet"),
    }
}

/// GET /api/v1/timeline/configuration/evacuation-times
pub async fn evacuation_times(State(state): State<Arc<AppState>>) -> Response {
    Json(state.evacuation.as_ref().clone()).into_response()
}
