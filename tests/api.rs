//! HTTP surface tests driven through the router without binding a socket

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use steri_timer::{
    create_router,
    services::{CheckpointStore, MemoryStore},
    tasks::{Capability, TickRegistry},
    timer::{EventBus, PhaseTable},
    utils::SystemClock,
    AppState, TimerEngine,
};

fn app() -> (Router, Arc<AppState>) {
    let checkpoints = CheckpointStore::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock));
    let engine = Arc::new(TimerEngine::new(PhaseTable::default(), checkpoints, EventBus::new(32)));
    let ticks = TickRegistry::new(
        Arc::clone(&engine),
        Duration::from_millis(100),
        Capability::interval_only(),
    );
    let state = Arc::new(AppState::new(engine, ticks, 0, "127.0.0.1".to_string()));
    (create_router(Arc::clone(&state)), state)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
    let (router, _) = app();
    let (status, body) = send(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn phases_lists_default_table() {
    let (router, _) = app();
    let (status, body) = send(&router, "GET", "/phases", None).await;
    assert_eq!(status, StatusCode::OK);

    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|phase| phase["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["autoclave", "bath", "drying"]);
    assert_eq!(body[1]["duration_display"], "30:00");
}

#[tokio::test]
async fn start_then_pause_drying() {
    let (router, state) = app();

    let (status, body) = send(&router, "POST", "/timers/drying/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_running"], true);
    assert_eq!(body["status"], "running");
    assert_eq!(state.ticks.active_count(), 1);

    let (status, body) = send(&router, "POST", "/timers/drying/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_running"], false);
    assert_eq!(body["status"], "paused");
    assert_eq!(state.ticks.active_count(), 0);

    state.shutdown();
}

#[tokio::test]
async fn unknown_phase_is_not_found() {
    let (router, _) = app();
    let (status, _) = send(&router, "POST", "/timers/rinse/start", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, "GET", "/timers/rinse", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn compliance_confirmation_is_recorded() {
    let (router, _) = app();
    let (status, body) = send(
        &router,
        "POST",
        "/timers/autoclave/compliance",
        Some(json!({ "flag": "biTestPassed", "value": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bi_test_passed"], true);
    assert_eq!(body["ci_strip_included"], false);
}

#[tokio::test]
async fn batch_hands_off_to_autoclave() {
    let (router, _) = app();
    let (status, _) = send(
        &router,
        "POST",
        "/timers/drying/batch",
        Some(json!({ "batch_id": "B7" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, "POST", "/timers/drying/handoff/autoclave", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase_id"], "autoclave");
    assert_eq!(body["batch_id"], "B7");
}

#[tokio::test]
async fn out_of_band_reading_is_flagged() {
    let (router, _) = app();
    let (status, body) = send(
        &router,
        "POST",
        "/phases/autoclave/validate",
        Some(json!({ "temperature": 121.0, "pressure": 206.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["within_tolerance"], false);
    assert_eq!(body["deviations"].as_array().unwrap().len(), 1);
    assert_eq!(body["deviations"][0]["quantity"], "temperature");
}

#[tokio::test]
async fn diagnostics_report_interval_only_capability() {
    let (router, _) = app();
    send(&router, "POST", "/timers/bath/start", None).await;

    let (status, body) = send(&router, "GET", "/diagnostics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tick_interval_ms"], 100);
    assert_eq!(body["capability"]["worker_threads"], false);
    assert_eq!(body["active_tick_sources"], 1);
    assert_eq!(body["tick_sources"][0]["kind"], "interval");
    assert_eq!(body["last_action"], "start bath");
}
