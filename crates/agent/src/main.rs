//! Opex agent - Kubernetes resource usage and cost analytics
//!
//! Polls the cluster API, records per-namespace usage series and
//! periodically exports trends and histograms as JSON datasets.

use anyhow::{Context, Result};
use opex_agent::{api, config::AgentConfig};
use opex_lib::{
    analytics::ExporterLoop,
    cluster::{CollectorLoopBuilder, K8sApiClient},
    health::HealthRegistry,
    observability::StructuredLogger,
    store::SeriesStore,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::load()?;

    // JSON logs, RUST_LOG wins over KOA_ENABLE_DEBUG
    let default_level = if config.enable_debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json())
        .init();

    for warning in config.warnings() {
        warn!("{warning}");
    }

    let cost_model = config.cost_model()?;
    let logger = StructuredLogger::new(&config.k8s_api_endpoint);
    logger.log_startup(AGENT_VERSION, cost_model.as_str(), config.polling_interval_sec);

    // Three missed cycles make the collector unhealthy
    let health_registry = HealthRegistry::new().with_stale_after(config.polling_interval() * 3);
    health_registry.register_all().await;

    let store = Arc::new(
        SeriesStore::open(&config.db_location, config.polling_interval().as_secs())
            .with_context(|| format!("Failed to open {}", config.db_location.display()))?,
    );
    let client = Arc::new(K8sApiClient::new(config.client_config()?)?);

    let collector = CollectorLoopBuilder::new()
        .source(client)
        .store(Arc::clone(&store))
        .config(config.collector_config())
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()?;
    let exporter = ExporterLoop::new(Arc::clone(&store), config.exporter_config()?)
        .with_health(health_registry.clone())
        .with_logger(logger.clone());

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        config.frontend_data_location.clone(),
        api::Settings {
            cost_model,
            currency_symbol: config.billing_currency_symbol.clone(),
            polling_interval_sec: config.polling_interval().as_secs(),
            billing_hourly_rate: config.billing_rate(),
        },
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let collector_handle = tokio::spawn(collector.run(shutdown_tx.subscribe()));
    let exporter_handle = tokio::spawn(exporter.run(shutdown_tx.subscribe()));
    let api_handle = tokio::spawn(api::serve(config.listen_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => {
                    let message = format!("{e:#}");
                    error!(error = %message, "API server failed");
                }
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
    }

    // Receivers may already be gone if a loop ended early
    let _ = shutdown_tx.send(());
    let _ = tokio::join!(collector_handle, exporter_handle);
    info!("Shutdown complete");

    Ok(())
}
