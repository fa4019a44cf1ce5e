//! API Regression Tests
//!
//! Exercises the HTTP surface against in-memory stores: submission,
//! validation failures, authentication, demo-key rate limiting, job
//! status, and cancellation conflicts.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use casgen::api::{routes, AppState, API_KEY_HEADER};
use casgen::auth::{AuthService, MemoryApiKeyStore};
use casgen::cache::NoopCache;
use casgen::config::{defaults, ServiceConfig};
use casgen::evac::EvacuationTimes;
use casgen::jobs::MemoryJobRepository;
use std::sync::Arc;
use tower::ServiceExt;

const DEMO_KEY: &str = defaults::DEMO_API_KEY_DEFAULT;
const LEGACY_KEY: &str = "legacy-key-0123456789abcdef";

fn test_app() -> Router {
    let store = Arc::new(MemoryApiKeyStore::new());
    let state = Arc::new(AppState {
        repo: Arc::new(MemoryJobRepository::new()),
        auth: Arc::new(AuthService::new(
            store,
            Some(LEGACY_KEY.to_string()),
            DEMO_KEY.to_string(),
        )),
        cache: Arc::new(NoopCache),
        evacuation: Arc::new(EvacuationTimes::embedded().unwrap()),
        service: ServiceConfig::default(),
        db: None,
        version: "test",
    });
    routes::build_router(state)
}

fn generation_body(total_patients: u32) -> serde_json::Value {
    serde_json::json!({
        "configuration": {
            "total_patients": total_patients,
            "days_of_fighting": 1,
            "base_date": "2025-06-01",
            "injury_mix": {
                "Battle Injury": 0.6,
                "Non-Battle Injury": 0.25,
                "Disease": 0.15
            },
            "fronts": [{
                "id": "north",
                "casualty_rate": 1.0,
                "nationality_distribution": { "USA": 1.0 }
            }],
            "warfare": { "conventional": true },
            "intensity": "high",
            "seed": 42
        },
        "output_formats": ["json", "csv"]
    })
}

fn post_generation(key: Option<&str>, body: &serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/generation/")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header(API_KEY_HEADER, key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn submission_returns_201_with_links() {
    let app = test_app();
    let response = app
        .oneshot(post_generation(Some(DEMO_KEY), &generation_body(50)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let v = body_json(response).await;
    assert_eq!(v["status"], "pending");
    assert!(v["job_id"].as_str().is_some());
    assert!(v["links"]["status"]
        .as_str()
        .unwrap()
        .starts_with("/api/v1/jobs/"));
    assert!(v["links"]["self"].as_str().is_some());
}

#[tokio::test]
async fn missing_api_key_is_401() {
    let app = test_app();
    let response = app
        .oneshot(post_generation(None, &generation_body(10)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let v = body_json(response).await;
    assert_eq!(v["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn unknown_api_key_is_401() {
    let app = test_app();
    let response = app
        .oneshot(post_generation(Some("not-a-key"), &generation_body(10)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn validation_detail_is_not_leaked_to_unauthenticated_callers() {
    let app = test_app();
    let mut body = generation_body(10);
    body["configuration"]["total_patients"] = serde_json::json!(0);
    let response = app
        .oneshot(post_generation(Some("not-a-key"), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_configuration_is_422_with_details() {
    let app = test_app();
    let mut body = generation_body(10);
    body["configuration"]["injury_mix"]["Disease"] = serde_json::json!(0.5);
    let response = app
        .oneshot(post_generation(Some(DEMO_KEY), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let v = body_json(response).await;
    assert_eq!(v["error"]["code"], "VALIDATION_ERROR");
    assert!(v["error"]["details"].as_array().is_some());
}

#[tokio::test]
async fn demo_key_patient_cap_is_403() {
    let app = test_app();
    let response = app
        .oneshot(post_generation(Some(DEMO_KEY), &generation_body(501)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let v = body_json(response).await;
    assert_eq!(v["error"]["code"], "QUOTA_EXCEEDED");
}

#[tokio::test]
async fn eleventh_demo_submission_in_a_minute_is_429() {
    let app = test_app();
    let body = generation_body(5);
    for i in 0..10 {
        let response = app
            .clone()
            .oneshot(post_generation(Some(DEMO_KEY), &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED, "submission {i}");
    }
    let response = app
        .oneshot(post_generation(Some(DEMO_KEY), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry: u64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry > 0);
}

#[tokio::test]
async fn legacy_key_bypasses_demo_limits() {
    let app = test_app();
    let response = app
        .oneshot(post_generation(Some(LEGACY_KEY), &generation_body(50_000)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn job_status_is_tenant_scoped() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(post_generation(Some(DEMO_KEY), &generation_body(10)))
        .await
        .unwrap();
    let job_id = body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    // Owner sees it
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/jobs/{job_id}"))
                .header(API_KEY_HEADER, DEMO_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["status"], "pending");

    // Another tenant gets 404, not 403 — jobs are invisible across keys
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/jobs/{job_id}"))
                .header(API_KEY_HEADER, LEGACY_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_returns_own_jobs_newest_first() {
    let app = test_app();
    for total in [5, 6, 7] {
        app.clone()
            .oneshot(post_generation(Some(DEMO_KEY), &generation_body(total)))
            .await
            .unwrap();
    }
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/jobs")
                .header(API_KEY_HEADER, DEMO_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn cancel_pending_job_then_conflict_on_repeat() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(post_generation(Some(DEMO_KEY), &generation_body(10)))
        .await
        .unwrap();
    let job_id = body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let cancel = |app: Router| {
        let uri = format!("/api/v1/jobs/{job_id}/cancel");
        async move {
            app.oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(API_KEY_HEADER, DEMO_KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
        }
    };

    let response = cancel(app.clone()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Pending jobs cancel immediately, so a second cancel conflicts
    let response = cancel(app).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn download_of_incomplete_job_is_404() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(post_generation(Some(DEMO_KEY), &generation_body(10)))
        .await
        .unwrap();
    let job_id = body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/downloads/{job_id}"))
                .header(API_KEY_HEADER, DEMO_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
