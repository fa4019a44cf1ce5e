//! Artifact download handler
//!
//! Streams files from the job's output directory. The job record is
//! authoritative for filenames; file presence is checked at stream
//! start, not at submission.

use crate::api::envelope::ApiErrorResponse;
use crate::api::{ApiKeyHeader, AppState};
use crate::types::JobStatus;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    /// Artifact filename; defaults to the bundle, falling back to
    /// `patients.json`
    pub file: Option<String>,
}

/// GET /api/v1/downloads/{id}?file=<name>
pub async fn download(
    State(state): State<Arc<AppState>>,
    ApiKeyHeader(raw_key): ApiKeyHeader,
    Path(id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
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
        return ApiErrorResponse::not_found("job has no downloadable artifacts");
    }

    let filename = match &query.file {
        Some(name) => name.clone(),
        None => job
            .output_files
            .iter()
            .find(|f| f.starts_with("job_"))
            .cloned()
            .unwrap_or_else(|| "patients.json".to_string()),
    };
    if !job.output_files.contains(&filename) {
        return ApiErrorResponse::not_found(format!("no artifact named '{filename}'"));
    }

    // The record is authoritative for names; the disk decides presence
    let path = state.service.output_root.join(job.dir_name()).join(&filename);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(_) => return ApiErrorResponse::not_found("artifact missing on disk"),
    };
    let length = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(e) => return ApiErrorResponse::storage(e.to_string()),
    };

    let stream = ReaderStream::new(file);
    let mut response = (StatusCode::OK, Body::from_stream(stream)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(media_type(&filename)),
    );
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

fn media_type(filename: &str) -> &'static str {
    if filename.ends_with(".json") {
        "application/json"
    } else if filename.ends_with(".csv") {
        "text/csv"
    } else if filename.ends_with(".zip") {
        "application/zip"
    } else {
        "application/octet-stream"
    }
}
