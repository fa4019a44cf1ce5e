//! API route definitions
//!
//! Organizes endpoints for the generation service:
//! - /api/v1/generation — submit a generation job
//! - /api/v1/jobs — job status, listing, cancellation
//! - /api/v1/downloads — artifact streaming
//! - /api/v1/timeline — per-patient timelines and statistics
//! - /api/v1/health — durable-store health probe

use super::handlers::{downloads, generation, health, jobs, timeline};
use super::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the complete API router
pub fn build_router(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        .route("/generation", post(generation::submit))
        .route("/generation/", post(generation::submit))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
        .route("/downloads/:id", get(downloads::download))
        .route(
            "/timeline/jobs/:id/patients/:pid",
            get(timeline::patient_timeline),
        )
        .route("/timeline/jobs/:id/statistics", get(timeline::job_statistics))
        .route(
            "/timeline/configuration/evacuation-times",
            get(timeline::evacuation_times),
        )
        .route("/health", get(health::get_health));

    Router::new()
        .nest("/api/v1", v1)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthService, MemoryApiKeyStore};
    use crate::cache::NoopCache;
    use crate::config::{defaults, ServiceConfig};
    use crate::evac::EvacuationTimes;
    use crate::jobs::MemoryJobRepository;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let store = Arc::new(MemoryApiKeyStore::new());
        Arc::new(AppState {
            repo: Arc::new(MemoryJobRepository::new()),
            auth: Arc::new(AuthService::new(
                store,
                None,
                defaults::DEMO_API_KEY_DEFAULT.to_string(),
            )),
            cache: Arc::new(NoopCache),
            evacuation: Arc::new(EvacuationTimes::embedded().unwrap()),
            service: ServiceConfig::default(),
            db: None,
            version: "test",
        })
    }

    #[tokio::test]
    async fn health_endpoint_answers_without_auth() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn jobs_listing_requires_an_api_key() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/jobs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn evacuation_config_endpoint_serves_active_table() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/timeline/configuration/evacuation-times")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(v.get("facilities").is_some());
        assert!(v.get("kia_modifiers").is_some());
    }
}
