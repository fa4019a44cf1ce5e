//! Service health handler

use crate::api::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthView {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
}

/// GET /api/v1/health — 200 when the durable store answers, else 503
pub async fn get_health(State(state): State<Arc<AppState>>) -> Response {
    let database = match &state.db {
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => "up",
            Err(_) => "down",
        },
        // In-memory mode has no dependency to probe
        None => "in-memory",
    };

    let healthy = database != "down";
    let body = HealthView {
        status: if healthy { "ok" } else { "degraded" },
        version: state.version,
        database,
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}
