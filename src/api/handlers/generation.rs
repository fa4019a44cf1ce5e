//! Generation submission handler

use crate::api::envelope::ApiErrorResponse;
use crate::api::{ApiKeyHeader, AppState};
use crate::config::request::{GenerationRequest, ScenarioConfig};
use crate::config::validation;
use crate::types::JobRecord;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration_seconds: Option<u64>,
    pub links: SubmitLinks,
}

#[derive(Debug, Serialize)]
pub struct SubmitLinks {
    #[serde(rename = "self")]
    pub self_: String,
    pub status: String,
    pub download: String,
}

/// POST /api/v1/generation/ — validate, admit, persist pending, enqueue.
/// Never runs generation synchronously.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    ApiKeyHeader(raw_key): ApiKeyHeader,
    Json(request): Json<GenerationRequest>,
) -> Response {
    // Authentication gates everything; quotas are consumed only after
    // validation has produced a patient count
    if let Err(err) = state.auth.authenticate(&raw_key).await {
        return ApiErrorResponse::from_admission(err);
    }

    // Resolve a referenced configuration through the side cache; a miss
    // surfaces as a validation error, never a hard failure
    let resolved: Option<ScenarioConfig> = match &request.configuration_id {
        Some(id) => state
            .cache
            .get(&format!("configuration:{id}"))
            .await
            .and_then(|v| serde_json::from_value(v).ok()),
        None => None,
    };

    let normalized = match validation::validate(
        &request,
        resolved,
        &state.evacuation,
        state.service.max_patients_per_job,
    ) {
        Ok(normalized) => normalized,
        Err(issues) => return ApiErrorResponse::validation(&issues),
    };

    let key = match state
        .auth
        .admit(&raw_key, normalized.total_patients)
        .await
    {
        Ok(key) => key,
        Err(err) => return ApiErrorResponse::from_admission(err),
    };

    let config_json = match serde_json::to_value(&normalized) {
        Ok(v) => v,
        Err(e) => return ApiErrorResponse::internal(e.to_string()),
    };
    let job = JobRecord::new_pending(&key.id, normalized.priority, config_json);
    if let Err(e) = state.repo.insert(&job).await {
        return ApiErrorResponse::storage(e.to_string());
    }

    info!(
        job_id = %job.id,
        tenant = %key.id,
        patients = normalized.total_patients,
        priority = %normalized.priority,
        "Generation job queued"
    );

    let id = job.id.to_string();
    let body = SubmitResponse {
        job_id: id.clone(),
        status: "pending".to_string(),
        message: format!(
            "Generation of {} patients queued",
            normalized.total_patients
        ),
        estimated_duration_seconds: Some(estimate_duration(normalized.total_patients)),
        links: SubmitLinks {
            self_: format!("/api/v1/jobs/{id}"),
            status: format!("/api/v1/jobs/{id}"),
            download: format!("/api/v1/downloads/{id}"),
        },
    };
    (StatusCode::CREATED, Json(body)).into_response()
}

/// Coarse up-front estimate shown to the caller at submission
fn estimate_duration(total_patients: u32) -> u64 {
    5 + (total_patients as u64) / 1_000
}
