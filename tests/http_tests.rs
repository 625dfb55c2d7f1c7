//! HTTP surface tests: auth middleware, endpoint wiring, error mapping.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use std::sync::Arc;
use tempfile::TempDir;
use torrent_shuttle::{http, Orchestrator};
use tower::ServiceExt;
use wiremock::MockServer;

const HASH: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

async fn router_with_key(api_key: &str) -> (axum::Router, Arc<Orchestrator>, TempDir) {
    let tmp = TempDir::new().unwrap();
    let qbit = MockServer::start().await;
    mount_session(&qbit).await;
    mount_commands(&qbit).await;

    let mut config = test_config(&tmp, &qbit);
    config.http.api_key = api_key.to_string();
    let orchestrator = Orchestrator::new(Arc::new(config)).unwrap();
    (http::router(Arc::clone(&orchestrator)), orchestrator, tmp)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_needs_no_auth() {
    let (router, _orch, _tmp) = router_with_key("secret").await;
    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "torrent-shuttle");
}

#[tokio::test]
async fn missing_key_is_401() {
    let (router, _orch, _tmp) = router_with_key("secret").await;
    let response = router
        .oneshot(Request::get("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_key_is_401() {
    let (router, _orch, _tmp) = router_with_key("secret").await;
    let response = router
        .oneshot(
            Request::get("/status")
                .header("X-API-Key", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn header_key_is_accepted() {
    let (router, _orch, _tmp) = router_with_key("secret").await;
    let response = router
        .oneshot(
            Request::get("/status")
                .header("X-API-Key", "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"]["name"], "torrent-shuttle");
    assert!(body["processing"].is_object());
    assert!(body["copy"].is_object());
    assert!(body["stats"].is_object());
    assert!(body["processes"].is_array());
}

#[tokio::test]
async fn query_key_is_accepted() {
    let (router, _orch, _tmp) = router_with_key("secret").await;
    let response = router
        .oneshot(
            Request::get("/status?api_key=secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn authed_requests_count_in_stats() {
    let (router, orchestrator, _tmp) = router_with_key("secret").await;
    for _ in 0..3 {
        router
            .clone()
            .oneshot(
                Request::get("/status")
                    .header("X-API-Key", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
    }
    assert_eq!(orchestrator.status().stats.api_requests, 3);
}

#[tokio::test]
async fn notify_returns_queue_id() {
    let (router, _orch, _tmp) = router_with_key("secret").await;
    let body = serde_json::json!({
        "hash": HASH,
        "params": {
            "name": "m.mkv",
            "content_path": "/cache/radarr/m.mkv",
            "save_path": "/cache/radarr",
            "size": 7,
            "num_files": 1,
            "category": "radarr"
        }
    });
    let response = router
        .oneshot(
            Request::post("/notify/torrent-finished")
                .header("X-API-Key", "secret")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["queue_id"].is_string());
}

#[tokio::test]
async fn notify_rejects_malformed_hash() {
    let (router, _orch, _tmp) = router_with_key("secret").await;
    let response = router
        .oneshot(
            Request::post("/notify/torrent-finished")
                .header("X-API-Key", "secret")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"hash": "not-hex"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("infohash"));
}

#[tokio::test]
async fn space_trigger_returns_ok() {
    let (router, _orch, _tmp) = router_with_key("secret").await;
    let response = router
        .oneshot(
            Request::post("/space-management/trigger")
                .header("X-API-Key", "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn queue_clear_reports_count() {
    let (router, orchestrator, _tmp) = router_with_key("secret").await;
    // Shut the dispatcher off so enqueued items stay pending.
    orchestrator.shutdown().await;

    let response = router
        .oneshot(
            Request::post("/queue/clear")
                .header("X-API-Key", "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["cleared_count"], 0);
}

#[tokio::test]
async fn state_save_writes_checkpoint() {
    let (router, orchestrator, _tmp) = router_with_key("secret").await;
    let response = router
        .oneshot(
            Request::post("/state/save")
                .header("X-API-Key", "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(orchestrator
        .config()
        .paths
        .state_dir
        .join("state/orchestrator_state.json")
        .exists());
}

#[tokio::test]
async fn copy_status_rejects_bad_batch_id() {
    let (router, _orch, _tmp) = router_with_key("secret").await;
    let response = router
        .oneshot(
            Request::get("/copy-operations/status?batch_id=not-a-uuid")
                .header("X-API-Key", "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn copy_status_empty_shape() {
    let (router, _orch, _tmp) = router_with_key("secret").await;
    let response = router
        .oneshot(
            Request::get("/copy-operations/status")
                .header("X-API-Key", "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["queued"], 0);
    assert_eq!(body["running"], 0);
    assert_eq!(body["completed"], 0);
    assert_eq!(body["failed"], 0);
    assert!(body["operations"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_configured_key_disables_auth() {
    let (router, _orch, _tmp) = router_with_key("").await;
    let response = router
        .oneshot(Request::get("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
