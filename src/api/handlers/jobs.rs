//! Job status, listing, and cancellation handlers

use super::JobView;
use crate::api::envelope::ApiErrorResponse;
use crate::api::{ApiKeyHeader, AppState};
use crate::types::JobRecord;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Look up a job and enforce the tenant boundary: a job is invisible
/// outside the key that owns it.
async fn owned_job(
    state: &AppState,
    raw_key: &str,
    id: Uuid,
) -> Result<JobRecord, Response> {
    let key = state
        .auth
        .authenticate(raw_key)
        .await
        .map_err(ApiErrorResponse::from_admission)?;
    match state.repo.get(id).await {
        Ok(Some(job)) if job.tenant == key.id => Ok(job),
        Ok(_) => Err(ApiErrorResponse::not_found("unknown job")),
        Err(e) => Err(ApiErrorResponse::storage(e.to_string())),
    }
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    ApiKeyHeader(raw_key): ApiKeyHeader,
    Path(id): Path<Uuid>,
) -> Response {
    match owned_job(&state, &raw_key, id).await {
        Ok(job) => Json(JobView::from_record(&job)).into_response(),
        Err(resp) => resp,
    }
}

/// GET /api/v1/jobs — tenant's jobs, newest first, paginated
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    ApiKeyHeader(raw_key): ApiKeyHeader,
    Query(query): Query<ListQuery>,
) -> Response {
    let key = match state.auth.authenticate(&raw_key).await {
        Ok(key) => key,
        Err(err) => return ApiErrorResponse::from_admission(err),
    };
    match state
        .repo
        .list(&key.id, query.limit.clamp(1, 500), query.offset.max(0))
        .await
    {
        Ok(jobs) => {
            let views: Vec<JobView> = jobs.iter().map(JobView::from_record).collect();
            Json(views).into_response()
        }
        Err(e) => ApiErrorResponse::storage(e.to_string()),
    }
}

/// POST /api/v1/jobs/{id}/cancel — 202 on accept, 409 when terminal
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    ApiKeyHeader(raw_key): ApiKeyHeader,
    Path(id): Path<Uuid>,
) -> Response {
    let job = match owned_job(&state, &raw_key, id).await {
        Ok(job) => job,
        Err(resp) => return resp,
    };
    if job.status.is_terminal() {
        return ApiErrorResponse::conflict(format!(
            "job is already {} and cannot be cancelled",
            job.status
        ));
    }
    match state.repo.request_cancel(id).await {
        Ok(true) => {
            info!(job_id = %id, "Cancellation requested");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "job_id": id.to_string(),
                    "status": "cancelling",
                })),
            )
                .into_response()
        }
        Ok(false) => ApiErrorResponse::conflict("job reached a terminal state first"),
        Err(e) => ApiErrorResponse::storage(e.to_string()),
    }
}
