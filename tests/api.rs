//! ==============================================================================
//! api.rs - http surface tests
//! ==============================================================================
//!
//! purpose:
//!     drives the axum router end to end against an in-memory sqlite store:
//!     ingest, latest, history, period lifecycle, export, sse frames.
//!
//! ==============================================================================

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use water_telemetry_hub::broadcast::Notification;
use water_telemetry_hub::config::HubConfig;
use water_telemetry_hub::estimator::EstimatorGateway;
use water_telemetry_hub::export;
use water_telemetry_hub::server::{self, AppState};
use water_telemetry_hub::sqlite::SqliteStore;
use water_telemetry_hub::{Measurement, TelemetryService};

async fn app_with(config: HubConfig) -> (Router, TelemetryService) {
    let store = SqliteStore::in_memory().await.unwrap();
    store.migrate().await.unwrap();
    let service = TelemetryService::open(Arc::new(store), EstimatorGateway::disabled())
        .await
        .unwrap();
    let router = server::router(AppState::new(service.clone(), config));
    (router, service)
}

async fn app() -> (Router, TelemetryService) {
    app_with(HubConfig::default()).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Bytes) {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(router: &Router, uri: &str, body: Value) -> (StatusCode, Bytes) {
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

async fn post_empty(router: &Router, uri: &str) -> (StatusCode, Bytes) {
    send(router, Request::post(uri).body(Body::empty()).unwrap()).await
}

async fn ingest(router: &Router, message: &str) -> StatusCode {
    post_json(router, "/lora", serde_json::json!({ "message": message })).await.0
}

async fn next_frame(body: &mut Body) -> Bytes {
    body.frame().await.unwrap().unwrap().into_data().unwrap()
}

fn json(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_ingest_and_latest() {
    let (router, _) = app().await;

    assert_eq!(ingest(&router, "pH:7.2,EC:abc,GPS:12.3,45.6").await, StatusCode::OK);

    let (status, body) = get(&router, "/lora/latest").await;
    assert_eq!(status, StatusCode::OK);
    let latest = json(&body);
    assert_eq!(latest["pH"], 7.2);
    assert!(latest["EC"].is_null());
    assert_eq!(latest["Lat"], "12.3");
    assert_eq!(latest["Lon"], "45.6");
    assert!(latest["timestamp"].is_string());
}

#[tokio::test]
async fn test_ingest_rejects_bad_envelope() {
    let (router, service) = app().await;

    let request = Request::post("/lora").body(Body::from("pH:7.2")).unwrap();
    let (status, body) = send(&router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["status"], "error");
    assert!(service.latest().is_empty());
}

#[tokio::test]
async fn test_latest_before_any_reading_is_empty_object() {
    let (router, _) = app().await;
    let (status, body) = get(&router, "/lora/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), serde_json::json!({}));
}

#[tokio::test]
async fn test_history_is_oldest_first_and_limited() {
    let (router, _) = app().await;
    for ph in ["7.1", "7.2", "7.3"] {
        ingest(&router, &format!("pH:{}", ph)).await;
    }

    let (_, body) = get(&router, "/lora/history?limit=2").await;
    let history = json(&body);
    let values: Vec<f64> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["pH"].as_f64().unwrap())
        .collect();
    assert_eq!(values, vec![7.2, 7.3]);

    let (_, body) = get(&router, "/lora/history").await;
    assert_eq!(json(&body).as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_malformed_parameters_get_json_errors() {
    let (router, _) = app().await;

    for uri in ["/lora/history?limit=-1", "/lora/history?limit=abc", "/periods/abc", "/periods/abc/export"] {
        let (status, body) = get(&router, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        let reply = json(&body);
        assert_eq!(reply["status"], "error", "{}", uri);
        assert!(reply["message"].is_string(), "{}", uri);
    }
}

#[tokio::test]
async fn test_period_conflict_and_not_active() {
    let (router, _) = app().await;

    let (status, body) = post_json(&router, "/periods/start", serde_json::json!({"name": "Run 1"})).await;
    assert_eq!(status, StatusCode::OK);
    let first_id = json(&body)["id"].as_i64().unwrap();

    let (status, body) = post_empty(&router, "/periods/start").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json(&body)["active_period_id"], first_id);

    let (_, body) = get(&router, "/periods/status").await;
    let status_body = json(&body);
    assert_eq!(status_body["active"], true);
    assert_eq!(status_body["id"], first_id);
    assert_eq!(status_body["name"], "Run 1");

    assert_eq!(post_empty(&router, "/periods/stop").await.0, StatusCode::OK);
    let (status, _) = post_empty(&router, "/periods/stop").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = get(&router, "/periods/status").await;
    assert_eq!(json(&body)["active"], false);
}

#[tokio::test]
async fn test_period_detail_list_and_export_round_trip() {
    let (router, service) = app().await;

    ingest(&router, "pH:6.9").await;
    post_json(&router, "/periods/start", serde_json::json!({"name": "Creek", "notes": "low flow"})).await;
    ingest(&router, "pH:7.05,EC:0.83,TDS:0.41,DO:1.2,Temp:18.5,GPS:41.403381,-72.174030").await;
    ingest(&router, "pH:7.11,GPS:NoFix").await;
    post_empty(&router, "/periods/stop").await;
    ingest(&router, "pH:7.4").await;
    post_empty(&router, "/periods/start").await;

    let (_, body) = get(&router, "/periods").await;
    let ids: Vec<i64> = json(&body)
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 1]);

    let (status, body) = get(&router, "/periods/1").await;
    assert_eq!(status, StatusCode::OK);
    let detail = json(&body);
    assert_eq!(detail["period"]["name"], "Creek");
    assert_eq!(detail["period"]["notes"], "low flow");
    assert!(detail["period"]["end_time"].is_string());
    assert_eq!(detail["has_coordinates"], true);
    assert_eq!(detail["readings"].as_array().unwrap().len(), 2);

    let response = router
        .clone()
        .oneshot(Request::get("/periods/1/export").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"period_1.csv\""
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let parsed = export::parse_csv(std::str::from_utf8(&body).unwrap()).unwrap();

    let stored = service.readings.history().period_readings(1).await.unwrap();
    assert_eq!(parsed, stored);
    assert_eq!(parsed[0].ec, Measurement::Value(0.83));
    assert_eq!(parsed[0].lon.as_deref(), Some("-72.174030"));
}

#[tokio::test]
async fn test_unknown_period_is_not_found() {
    let (router, _) = app().await;
    assert_eq!(get(&router, "/periods/99").await.0, StatusCode::NOT_FOUND);
    assert_eq!(get(&router, "/periods/99/export").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stream_sends_update_then_notifications() {
    let (router, service) = app().await;

    let response = router
        .clone()
        .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(service.hub.subscriber_count(), 1);

    let mut body = response.into_body();
    assert_eq!(next_frame(&mut body).await, "data: update\n\n");

    service.hub.notify(Notification::Heartbeat);
    assert_eq!(next_frame(&mut body).await, ": heartbeat\n\n");

    drop(body);
    assert_eq!(service.hub.subscriber_count(), 0);
    assert_eq!(service.hub.notify(Notification::Update), 0);
}

#[tokio::test]
async fn test_ingest_notifies_stream() {
    let (router, service) = app().await;
    let response = router
        .clone()
        .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut body = response.into_body();
    next_frame(&mut body).await;

    ingest(&router, "pH:7.0").await;
    assert_eq!(next_frame(&mut body).await, "data: update\n\n");
    assert_eq!(service.hub.subscriber_count(), 1);
}

#[tokio::test]
async fn test_test_data_endpoint() {
    let (router, _) = app().await;
    let (status, body) = get(&router, "/test-data").await;
    assert_eq!(status, StatusCode::OK);
    let reply = json(&body);
    assert_eq!(reply["status"], "success");
    assert!(reply["data"]["pH"].is_number());

    let (_, body) = get(&router, "/lora/history").await;
    assert_eq!(json(&body).as_array().unwrap().len(), 1);

    let mut config = HubConfig::default();
    config.test_data.enabled = false;
    let (router, _) = app_with(config).await;
    assert_eq!(get(&router, "/test-data").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
    let (router, service) = app().await;
    let _subscription = service.hub.subscribe();
    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let health = json(&body);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["subscribers"], 1);
    assert!(health["active_period"].is_null());
}
