//! Consistent error envelope for all API endpoints.
//!
//! Every error response carries the shape
//! `{ "error": { "code": "...", "message": "...", "details": ... } }`
//! so clients switch on `error.code` rather than status text.

use crate::auth::AdmissionError;
use crate::config::validation::ValidationIssue;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Error detail inside [`ApiErrorResponse`].
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response: `{ "error": { "code": "...", "message": "..." } }`
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
}

impl ApiErrorResponse {
    fn build(
        status: StatusCode,
        code: &str,
        msg: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Response {
        let body = Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: msg.into(),
                details,
            },
        };
        (status, axum::Json(body)).into_response()
    }

    pub fn validation(issues: &[ValidationIssue]) -> Response {
        let details = serde_json::to_value(issues).unwrap_or(serde_json::Value::Null);
        Self::build(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            "request failed validation",
            Some(details),
        )
    }

    pub fn unauthorized() -> Response {
        Self::build(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or invalid API key",
            None,
        )
    }

    pub fn rate_limited(retry_after_secs: u64) -> Response {
        let mut response = Self::build(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "request rate limit exceeded",
            None,
        );
        if let Ok(value) = retry_after_secs.to_string().parse() {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::FORBIDDEN, "QUOTA_EXCEEDED", msg, None)
    }

    pub fn not_found(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::NOT_FOUND, "NOT_FOUND", msg, None)
    }

    pub fn conflict(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::CONFLICT, "CONFLICT", msg, None)
    }

    pub fn storage(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::SERVICE_UNAVAILABLE, "STORAGE_ERROR", msg, None)
    }

    pub fn internal(msg: impl Into<String>) -> Response {
        Self::build(
            StatusCode::INTERNAL_SERVER_ERROR,
            "GENERATION_ERROR",
            msg,
            None,
        )
    }

    /// Map an admission failure onto the error taxonomy
    pub fn from_admission(err: AdmissionError) -> Response {
        match err {
            AdmissionError::Unauthorized => Self::unauthorized(),
            AdmissionError::RateLimited { retry_after_secs } => {
                Self::rate_limited(retry_after_secs)
            }
            AdmissionError::QuotaExceeded { message } => Self::quota_exceeded(message),
            AdmissionError::Storage(e) => Self::storage(e.to_string()),
        }
    }
}
