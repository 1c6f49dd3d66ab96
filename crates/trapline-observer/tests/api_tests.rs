//! Integration tests for the observer API endpoints.
//!
//! Tests drive the Axum `Router` directly via `tower::ServiceExt` without
//! starting a TCP server, except for one test that checks the spawned
//! server answers over a real socket.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tower::ServiceExt;
use trapline_core::config::{ObserverConfig, SessionConfig};
use trapline_core::operator::OperatorState;
use trapline_core::registry::EntityRegistry;
use trapline_core::scheduler::{LoopPhase, RunMode};
use trapline_observer::router::build_router;
use trapline_observer::server::spawn_observer;
use trapline_observer::state::{AppState, LoopSnapshot};
use trapline_types::{LifeState, Position, Timestamp};

struct Harness {
    state: Arc<AppState>,
    operator: Arc<OperatorState>,
    registry: Arc<EntityRegistry>,
    settings_rx: oneshot::Receiver<SessionConfig>,
}

fn harness() -> Harness {
    let (operator, settings_rx) = OperatorState::new(600, 0);
    let operator = Arc::new(operator);
    let registry = Arc::new(EntityRegistry::new());
    registry.update_from_observation(Position::new(1, 1, 0), LifeState::Armed, Timestamp::ZERO);
    registry.update_from_observation(Position::new(2, 2, 0), LifeState::Collapsed, Timestamp::from_secs(1));
    let state = Arc::new(AppState::with_session(Arc::clone(&operator), Arc::clone(&registry)));
    Harness {
        state,
        operator,
        registry,
        settings_rx,
    }
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(router: Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

async fn post(router: Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

// =========================================================================
// Read endpoints
// =========================================================================

#[tokio::test]
async fn status_before_any_tick() {
    let (status, json) = get(build_router(Arc::new(AppState::new())), "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["tick"], 0);
    assert_eq!(json["phase"]["phase"], "awaiting_configuration");
    assert_eq!(json["may_pause"], true);
    assert!(json["confirmed"].is_null());
}

#[tokio::test]
async fn status_reflects_published_snapshot_and_operator() {
    let h = harness();
    let published = h.state.try_publish(LoopSnapshot {
        tick: 42,
        phase: LoopPhase::Running(RunMode::Draining),
        tracked: 2,
        may_pause: false,
        strategy: Some("nearest".to_owned()),
        ..LoopSnapshot::default()
    });
    assert!(published);
    h.operator.request_drain();

    let (status, json) = get(build_router(h.state), "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["tick"], 42);
    assert_eq!(json["phase"]["phase"], "running");
    assert_eq!(json["phase"]["mode"], "draining");
    assert_eq!(json["draining"], true);
    assert_eq!(json["drain_requested"], true);
    assert_eq!(json["confirmed"], false);
    assert_eq!(json["tick_interval_ms"], 600);
    assert_eq!(json["strategy"], "nearest");
    assert!(json["stats"].is_object());
}

#[tokio::test]
async fn entities_read_the_live_registry() {
    let h = harness();
    let router = build_router(h.state);

    let (status, json) = get(router.clone(), "/api/entities").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 2);

    let (_, json) = get(router.clone(), "/api/entities?state=armed").await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["entities"][0]["position"]["x"], 1);

    let (_, json) = get(router, "/api/entities?flag=needs-interaction").await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["entities"][0]["position"]["x"], 2);
}

#[tokio::test]
async fn entities_reject_unknown_filters() {
    let router = build_router(harness().state);
    let (status, json) = get(router.clone(), "/api/entities?state=sleeping").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], 400);

    let (status, _) = get(router, "/api/entities?flag=shiny").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn entities_fall_back_to_snapshot() {
    let registry = EntityRegistry::new();
    registry.update_from_observation(Position::new(5, 5, 0), LifeState::Armed, Timestamp::ZERO);
    let state = Arc::new(AppState::new());
    assert!(state.try_publish(LoopSnapshot {
        entities: registry.snapshot(),
        ..LoopSnapshot::default()
    }));

    let (_, json) = get(build_router(state), "/api/entities").await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["entities"][0]["position"]["x"], 5);
}

#[tokio::test]
async fn priority_returns_the_next_service_target() {
    let h = harness();
    let (status, json) = get(build_router(Arc::clone(&h.state)), "/api/priority").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["entity"]["position"]["x"], 2);
    assert_eq!(json["flag"], "needs-interaction");

    h.registry.clear_all();
    let (_, json) = get(build_router(h.state), "/api/priority").await;
    assert!(json["entity"].is_null());
    assert!(json["flag"].is_null());
}

// =========================================================================
// Operator endpoints
// =========================================================================

#[tokio::test]
async fn confirm_delivers_settings_once() {
    let h = harness();
    let router = build_router(h.state);
    let body = json!({
        "max_entities": 2,
        "strategy": "spaced",
        "zones": [{ "plane": 0, "min_x": 0, "min_y": 0, "max_x": 4, "max_y": 4 }],
        "seed": 9,
    });

    let (status, json) = post(router.clone(), "/api/operator/confirm", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);

    let (status, _) = post(router, "/api/operator/confirm", &body).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let settings = h.settings_rx.await.unwrap();
    assert_eq!(settings.max_entities, 2);
    assert_eq!(settings.seed, Some(9));
    assert!(h.operator.is_confirmed());
}

#[tokio::test]
async fn confirm_rejects_invalid_settings() {
    let h = harness();
    let (status, _) = post(
        build_router(h.state),
        "/api/operator/confirm",
        &json!({ "max_entities": 0 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!h.operator.is_confirmed());
}

#[tokio::test]
async fn drain_and_resume_toggle_the_request() {
    let h = harness();
    let router = build_router(h.state);

    let (status, _) = post(router.clone(), "/api/operator/drain", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.operator.is_drain_requested());

    let (status, _) = post(router, "/api/operator/resume", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!h.operator.is_drain_requested());
}

#[tokio::test]
async fn speed_enforces_the_floor() {
    let h = harness();
    let router = build_router(h.state);

    let (status, _) = post(router.clone(), "/api/operator/speed", &json!({ "tick_interval_ms": 10 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = post(router, "/api/operator/speed", &json!({ "tick_interval_ms": 300 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["previous_interval_ms"], 600);
    assert_eq!(h.operator.tick_interval_ms(), 300);
}

#[tokio::test]
async fn stop_sets_the_flag() {
    let h = harness();
    let (status, _) = post(build_router(h.state), "/api/operator/stop", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.operator.is_stop_requested());
}

#[tokio::test]
async fn operator_endpoints_need_a_session() {
    let router = build_router(Arc::new(AppState::new()));
    let (status, json) = post(router, "/api/operator/drain", &json!({})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], 503);
}

#[tokio::test]
async fn nonexistent_route_returns_404() {
    let response = build_router(Arc::new(AppState::new()))
        .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =========================================================================
// Server
// =========================================================================

#[tokio::test]
async fn spawned_server_answers_over_tcp() {
    let config = ObserverConfig {
        enabled: true,
        host: "127.0.0.1".to_owned(),
        port: 0,
    };
    let (addr, handle) = spawn_observer(&config, Arc::new(AppState::new())).await.unwrap();

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /api/status HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("awaiting_configuration"));

    handle.abort();
}
