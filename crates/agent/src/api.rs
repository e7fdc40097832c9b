//! HTTP API for health checks, Prometheus metrics and exported datasets

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use opex_lib::{
    analytics::{dataset_names, CostModel},
    health::{ComponentStatus, HealthRegistry},
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Settings a frontend needs to render the datasets
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub cost_model: CostModel,
    pub currency_symbol: String,
    pub polling_interval_sec: u64,
    pub billing_hourly_rate: Option<f64>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    /// Directory the exporter writes datasets to
    pub data_dir: PathBuf,
    pub settings: Settings,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, data_dir: PathBuf, settings: Settings) -> Self {
        Self {
            health_registry,
            data_dir,
            settings,
        }
    }
}

#[derive(Debug, Serialize)]
struct DatasetList {
    datasets: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiError {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Health check response - returns 200 unless a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once a collection cycle completed
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn settings(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.settings.clone())
}

/// Datasets already written by the exporter
async fn list_datasets(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut datasets = Vec::new();
    for name in dataset_names() {
        if tokio::fs::try_exists(state.data_dir.join(format!("{name}.json")))
            .await
            .unwrap_or(false)
        {
            datasets.push(name);
        }
    }
    Json(DatasetList { datasets })
}

async fn get_dataset(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    let name = name.strip_suffix(".json").unwrap_or(&name);

    let valid_chars = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid_chars {
        return api_error(StatusCode::BAD_REQUEST, format!("Invalid dataset name {name:?}"));
    }
    if !dataset_names().iter().any(|known| known == name) {
        return api_error(StatusCode::NOT_FOUND, format!("Unknown dataset {name}"));
    }

    let path = state.data_dir.join(format!("{name}.json"));
    match tokio::fs::read(&path).await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => api_error(
            StatusCode::NOT_FOUND,
            format!("Dataset {name} has not been exported yet"),
        ),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read dataset");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/settings", get(settings))
        .route("/api/v1/datasets", get(list_datasets))
        .route("/api/v1/datasets/:name", get(get_dataset))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
