//! HTTP API surface
//!
//! The handlers only enqueue work and read status; generation happens on
//! the worker pool. Authentication is a key in the `X-API-Key` header,
//! extracted by [`ApiKeyHeader`] and checked against the admission
//! service per handler.

pub mod envelope;
pub mod handlers;
pub mod routes;

use crate::auth::AuthService;
use crate::cache::Cache;
use crate::config::ServiceConfig;
use crate::evac::EvacuationTimes;
use crate::jobs::JobRepository;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::Response;
use envelope::ApiErrorResponse;
use sqlx::PgPool;
use std::sync::Arc;

/// Request header carrying the API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared application state behind every handler
pub struct AppState {
    pub repo: Arc<dyn JobRepository>,
    pub auth: Arc<AuthService>,
    pub cache: Arc<dyn Cache>,
    pub evacuation: Arc<EvacuationTimes>,
    pub service: ServiceConfig,
    /// Present when backed by PostgreSQL; the health probe pings it
    pub db: Option<PgPool>,
    pub version: &'static str,
}

/// API key extracted from the request header. Missing header rejects
/// with 401 before the handler runs; validity is checked per handler.
pub struct ApiKeyHeader(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ApiKeyHeader
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| ApiKeyHeader(v.to_string()))
            .ok_or_else(ApiErrorResponse::unauthorized)
    }
}
