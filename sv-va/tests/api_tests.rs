//! HTTP API integration tests
//!
//! Drives the router directly with `tower::ServiceExt::oneshot` against
//! an in-memory database and a stubbed inference engine.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use base64::Engine as _;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use sv_common::events::EventBus;
use sv_va::config::ServiceConfig;
use sv_va::services::inference::{InferenceEngine, InferenceError};
use sv_va::services::jobs::JobQueue;
use sv_va::storage::FrameStore;
use sv_va::{build_router, AppState};

/// Engine that always reports the same structured finding
struct StubEngine;

#[async_trait]
impl InferenceEngine for StubEngine {
    async fn analyze(&self, _jpeg: &[u8], _prompt: &str) -> Result<String, InferenceError> {
        Ok(
            "Finding: Mild erythema\nLocation: Gastric antrum\nRisk Level: Low\nSuggested Next Step: Continue inspection\n"
                .to_string(),
        )
    }

    async fn reset(&self) {}

    fn model_name(&self) -> &str {
        "stub-model"
    }
}

/// Build app state over an in-memory database
///
/// The returned receiver keeps the job queue open; no worker runs, so
/// enqueued jobs just sit there.
async fn test_app_state(
    dir: &tempfile::TempDir,
) -> (AppState, tokio::sync::mpsc::Receiver<sv_va::services::jobs::Job>) {
    let pool = sv_va::db::init_memory_pool().await.unwrap();
    let store = FrameStore::new(dir.path()).unwrap();
    let (jobs, rx) = JobQueue::new(4);

    let state = AppState::new(
        pool,
        EventBus::new(100),
        ServiceConfig::default(),
        store,
        Arc::new(StubEngine),
        jobs,
    );
    (state, rx)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Tiny valid JPEG produced in memory
fn test_jpeg_b64() -> String {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([120, 60, 40]));
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Jpeg,
    )
    .unwrap();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// TC-API-001: Health endpoint reports the module
#[tokio::test]
async fn tc_api_001_health() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _rx) = test_app_state(&dir).await;
    let app = build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "sv-va");
}

/// TC-API-002: Creating a session queues it and returns 202
#[tokio::test]
async fn tc_api_002_create_session() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mut rx) = test_app_state(&dir).await;
    let app = build_router(state);

    // Given: a video file that exists on disk
    let video = dir.path().join("case.mp4");
    std::fs::write(&video, b"fake video bytes").unwrap();

    // When
    let response = app
        .oneshot(json_request(
            "POST",
            "/sessions",
            json!({
                "video_path": video.display().to_string(),
                "title": "Case 17",
                "procedure_type": "colonoscopy",
            }),
        ))
        .await
        .unwrap();

    // Then: accepted as pending, job waiting in the queue
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "pending");
    assert!(rx.try_recv().is_ok());
}

/// TC-API-003: A second session is refused while one is active
#[tokio::test]
async fn tc_api_003_create_conflicts_with_active_session() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _rx) = test_app_state(&dir).await;
    let app = build_router(state);

    let video = dir.path().join("case.mp4");
    std::fs::write(&video, b"fake video bytes").unwrap();
    let request_body = json!({ "video_path": video.display().to_string() });

    let first = app
        .clone()
        .oneshot(json_request("POST", "/sessions", request_body.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = app
        .oneshot(json_request("POST", "/sessions", request_body))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

/// TC-API-004: Missing video path is a 400
#[tokio::test]
async fn tc_api_004_create_rejects_missing_video() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _rx) = test_app_state(&dir).await;
    let app = build_router(state);

    let response = app
        .oneshot(json_request(
            "POST",
            "/sessions",
            json!({ "video_path": "/does/not/exist.mp4" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// TC-API-005: Unknown session ids return 404
#[tokio::test]
async fn tc_api_005_unknown_session_404() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _rx) = test_app_state(&dir).await;
    let app = build_router(state);

    let uri = format!("/sessions/{}", uuid::Uuid::new_v4());
    let response = app
        .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// TC-API-006: Live snapshot appends to the timeline of an active
/// session
#[tokio::test]
async fn tc_api_006_live_snapshot_flow() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _rx) = test_app_state(&dir).await;
    let app = build_router(state);

    // Given: an active live session
    let started = app
        .clone()
        .oneshot(json_request("POST", "/live/session/start", json!({})))
        .await
        .unwrap();
    assert_eq!(started.status(), StatusCode::OK);

    // When: a snapshot is analyzed
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/live/snapshot",
            json!({ "image": test_jpeg_b64() }),
        ))
        .await
        .unwrap();

    // Then: the finding is returned and buffered
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["finding"]["finding"], "Mild erythema");
    assert_eq!(body["appended"], true);

    let timeline = app
        .oneshot(
            Request::builder()
                .uri("/live/timeline")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(timeline).await;
    assert_eq!(body["entries"].as_array().unwrap().len(), 1);
}

/// TC-API-007: Garbage snapshot payloads are rejected
#[tokio::test]
async fn tc_api_007_snapshot_rejects_bad_image() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _rx) = test_app_state(&dir).await;
    let app = build_router(state);

    // Not base64 at all
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/live/snapshot",
            json!({ "image": "!!!not-base64!!!" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Valid base64 of bytes that are not an image
    let garbage = base64::engine::general_purpose::STANDARD.encode(b"plain text");
    let response = app
        .oneshot(json_request(
            "POST",
            "/live/snapshot",
            json!({ "image": garbage }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// TC-API-008: Clarify requires a prior snapshot
#[tokio::test]
async fn tc_api_008_clarify_requires_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _rx) = test_app_state(&dir).await;
    let app = build_router(state);

    let response = app
        .oneshot(json_request(
            "POST",
            "/live/clarify",
            json!({ "question": "Is the lesion bleeding?" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// TC-API-009: Clearing the live session empties the buffer
#[tokio::test]
async fn tc_api_009_live_clear() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _rx) = test_app_state(&dir).await;
    let app = build_router(state);

    app.clone()
        .oneshot(json_request("POST", "/live/session/start", json!({})))
        .await
        .unwrap();
    app.clone()
        .oneshot(json_request(
            "POST",
            "/live/snapshot",
            json!({ "image": test_jpeg_b64() }),
        ))
        .await
        .unwrap();

    let cleared = app
        .clone()
        .oneshot(json_request("POST", "/live/session/clear", json!({})))
        .await
        .unwrap();
    assert_eq!(cleared.status(), StatusCode::OK);

    let current = app
        .oneshot(
            Request::builder()
                .uri("/live/session/current")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(current).await;
    assert_eq!(body["active"], false);
    assert_eq!(body["findings_count"], 0);
}
