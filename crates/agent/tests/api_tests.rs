//! Integration tests for the agent API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use opex_agent::api::{create_router, AppState, Settings};
use opex_lib::{
    analytics::CostModel,
    health::{components, HealthRegistry},
    observability::OpexMetrics,
};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>, TempDir) {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let data_dir = TempDir::new().unwrap();
    let settings = Settings {
        cost_model: CostModel::ChargeBack,
        currency_symbol: "€".to_string(),
        polling_interval_sec: 300,
        billing_hourly_rate: Some(7.95),
    };
    let state = Arc::new(AppState::new(
        health_registry,
        data_dir.path().to_path_buf(),
        settings,
    ));
    let router = create_router(state.clone());

    (router, state, data_dir)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn json(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state, _dir) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::COLLECTOR, "2 API calls failed")
        .await;

    // Degraded still returns 200 (operational)
    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _dir) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::STORE, "Database directory is read-only")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json(&body)["status"], "unhealthy");
}

#[tokio::test]
async fn test_healthz_includes_component_details() {
    let (app, _state, _dir) = setup_test_app().await;

    let (_, body) = get(app, "/healthz").await;
    let health = json(&body);
    assert!(health["components"]["collector"].is_object());
    assert!(health["components"]["exporter"].is_object());
    assert!(health["components"]["store"].is_object());
}

#[tokio::test]
async fn test_readyz_returns_503_before_first_cycle() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json(&body)["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state, _dir) = setup_test_app().await;

    state.health_registry.record_cycle(unix_now()).await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_ready_but_unhealthy() {
    let (app, state, _dir) = setup_test_app().await;

    state.health_registry.record_cycle(unix_now()).await;
    state
        .health_registry
        .set_unhealthy(components::COLLECTOR, "Failed")
        .await;

    let (status, _) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state, _dir) = setup_test_app().await;

    let metrics = OpexMetrics::new();
    metrics.observe_collection_latency(0.25);
    metrics.set_hourly_usage("default", "CPU", 12.5);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("koa_collection_latency_seconds_bucket"));
    assert!(metrics_text.contains("koa_collection_latency_seconds_count"));
    assert!(metrics_text.contains("koa_namespace_hourly_usage"));
    assert!(metrics_text.contains("koa_api_errors_total"));
}

#[tokio::test]
async fn test_settings_endpoint() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, body) = get(app, "/api/v1/settings").await;
    assert_eq!(status, StatusCode::OK);
    let settings = json(&body);
    assert_eq!(settings["costModel"], "CHARGE_BACK");
    assert_eq!(settings["currencySymbol"], "€");
    assert_eq!(settings["pollingIntervalSec"], 300);
    assert_eq!(settings["billingHourlyRate"], 7.95);
}

#[tokio::test]
async fn test_datasets_list_only_exported_files() {
    let (app, _state, dir) = setup_test_app().await;

    std::fs::write(dir.path().join("nodes.json"), "{}").unwrap();
    std::fs::write(dir.path().join("cpu_usage_trends.json"), "[]").unwrap();
    std::fs::write(dir.path().join("notes.json"), "{}").unwrap();

    let (status, body) = get(app, "/api/v1/datasets").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<String> = serde_json::from_value(json(&body)["datasets"].clone()).unwrap();
    assert_eq!(names, vec!["nodes", "cpu_usage_trends"]);
}

#[tokio::test]
async fn test_get_dataset_serves_file_content() {
    let (app, _state, dir) = setup_test_app().await;

    let content = r#"[{"stack":"default","usage":12.5,"date":"Mar 02"}]"#;
    std::fs::write(dir.path().join("cpu_usage_period_1209600.json"), content).unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/datasets/cpu_usage_period_1209600")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert_eq!(content_type, "application/json");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), content.as_bytes());
}

#[tokio::test]
async fn test_get_dataset_accepts_json_suffix() {
    let (app, _state, dir) = setup_test_app().await;

    std::fs::write(dir.path().join("nodes.json"), "{}").unwrap();

    let (status, body) = get(app, "/api/v1/datasets/nodes.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"{}");
}

#[tokio::test]
async fn test_get_dataset_not_exported_yet() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, body) = get(app, "/api/v1/datasets/nodes").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json(&body)["error"]
        .as_str()
        .unwrap()
        .contains("not been exported"));
}

#[tokio::test]
async fn test_get_dataset_rejects_unknown_and_invalid_names() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, _) = get(app.clone(), "/api/v1/datasets/passwords").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(app, "/api/v1/datasets/..%2Fsecrets").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
