//! Dataset export loop
//!
//! Runs on a slower interval than the collector so that every export
//! reflects at least one full collection cycle. Each export rewrites all
//! dataset files and refreshes the per-namespace Prometheus gauges.

use super::{
    attribute, dump_trend, round_output, CostModel, DateBucket, Period, PeriodRollup, Resource,
};
use crate::cluster::NODES_FILE;
use crate::health::{components, HealthRegistry};
use crate::observability::{OpexMetrics, StructuredLogger};
use crate::store::{write_json_atomic, Entity, SeriesStore};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Configuration for the export loop
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Export interval (default: 450 seconds, 1.5 polling intervals)
    pub interval: Duration,
    /// Directory receiving the dataset files
    pub data_dir: PathBuf,
    pub cost_model: CostModel,
    /// Configured billing hourly rate, reported when charge-back cannot bill
    pub billing_hourly_rate: Option<f64>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(450),
            data_dir: PathBuf::from("./static/data"),
            cost_model: CostModel::default(),
            billing_hourly_rate: None,
        }
    }
}

impl ExporterConfig {
    /// Export interval for a given polling interval
    pub fn interval_for(polling: Duration) -> Duration {
        Duration::from_millis((polling.as_millis() as f64 * 1.5).round() as u64)
    }
}

/// One row of a histogram dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramPoint {
    pub stack: String,
    pub usage: f64,
    pub date: String,
}

/// Outcome of one export
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    /// Entities read from the store
    pub entities: usize,
    /// Dataset names written
    pub datasets: Vec<String>,
    /// Buckets a charge-back export could not bill
    pub unbilled_buckets: usize,
}

/// Names of every dataset the agent publishes, without extension
pub fn dataset_names() -> Vec<String> {
    let mut names = vec![NODES_FILE.trim_end_matches(".json").to_string()];
    for resource in Resource::ALL {
        names.push(trend_dataset(resource));
    }
    for period in Period::HISTOGRAMS {
        for resource in Resource::ALL {
            names.push(histogram_dataset(resource, "usage", period));
            names.push(histogram_dataset(resource, "requests", period));
        }
    }
    names
}

fn trend_dataset(resource: Resource) -> String {
    format!("{}_usage_trends", resource.file_prefix())
}

fn histogram_dataset(resource: Resource, kind: &str, period: Period) -> String {
    format!("{}_{kind}_period_{}", resource.file_prefix(), period.seconds())
}

/// Export loop turning stored series into dataset files
pub struct ExporterLoop {
    store: Arc<SeriesStore>,
    config: ExporterConfig,
    health: HealthRegistry,
    metrics: OpexMetrics,
    logger: StructuredLogger,
}

impl ExporterLoop {
    pub fn new(store: Arc<SeriesStore>, config: ExporterConfig) -> Self {
        Self {
            store,
            config,
            health: HealthRegistry::new(),
            metrics: OpexMetrics::new(),
            logger: StructuredLogger::new("default"),
        }
    }

    /// Report component health into a shared registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Run exports until a shutdown signal is received
    ///
    /// The first export happens one interval after start.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            cost_model = %self.config.cost_model,
            data_dir = %self.config.data_dir.display(),
            "Starting dataset export loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    if let Err(e) = self.run_export(now).await {
                        let message = format!("{e:#}");
                        error!(error = %message, "Export cycle failed");
                        self.health.set_degraded(components::EXPORTER, message).await;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down dataset export loop");
                    break;
                }
            }
        }
    }

    /// Export every dataset as of `now` (Unix seconds)
    pub async fn run_export(&self, now: i64) -> Result<ExportReport> {
        let start = Instant::now();
        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let metrics = self.metrics.clone();

        let report = tokio::task::spawn_blocking(move || export_all(&store, &config, &metrics, now))
            .await
            .context("Exporter task panicked")??;

        if self.config.cost_model == CostModel::ChargeBack && report.unbilled_buckets > 0 {
            self.logger
                .log_charge_back_misconfigured(self.config.billing_hourly_rate);
        }
        self.logger.log_export(
            report.entities,
            report.datasets.len(),
            self.config.cost_model.as_str(),
            start.elapsed().as_millis(),
        );
        self.health.set_healthy(components::EXPORTER).await;
        self.health.record_export(now).await;

        Ok(report)
    }
}

fn export_all(
    store: &SeriesStore,
    config: &ExporterConfig,
    metrics: &OpexMetrics,
    now: i64,
) -> Result<ExportReport> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    let series = store.load_all().context("Failed to list series")?;
    let mut report = ExportReport {
        entities: series.len(),
        ..Default::default()
    };
    metrics.reset_exports();

    // Trends
    let mut trends: BTreeMap<Resource, Vec<super::TrendPoint>> = BTreeMap::new();
    let tracked = series
        .entities()
        .filter(|e| matches!(e, Entity::Namespace(_) | Entity::NonAllocatable));
    for entity in tracked {
        let trend = dump_trend(&series, entity, Period::Week, now);
        for resource in Resource::ALL {
            if let Some(last) = trend.last(resource) {
                metrics.set_hourly_usage(entity.display_name(), resource.label(), last);
            }
            trends
                .entry(resource)
                .or_default()
                .extend_from_slice(trend.points(resource));
        }
    }
    for resource in Resource::ALL {
        let name = trend_dataset(resource);
        let points = trends.remove(&resource).unwrap_or_default();
        write_dataset(&config.data_dir, &name, &points)?;
        report.datasets.push(name);
    }

    // Histograms
    for period in Period::HISTOGRAMS {
        let rollup = PeriodRollup::build(&series, period, now);
        for resource in Resource::ALL {
            for (kind, table) in [("usage", &rollup.usage), ("requests", &rollup.requests)] {
                let values = PeriodRollup::resource_table(table, resource);
                let attribution = attribute(config.cost_model, &values, &rollup.billing);
                report.unbilled_buckets += attribution.unbilled.len();

                let points = histogram_points(&attribution.values);
                for point in &points {
                    if kind == "usage" {
                        metrics.set_periodic_usage(
                            period.label(),
                            &point.stack,
                            resource.label(),
                            &point.date,
                            point.usage,
                        );
                    } else {
                        metrics.set_periodic_requests(
                            period.label(),
                            &point.stack,
                            resource.label(),
                            &point.date,
                            point.usage,
                        );
                    }
                }

                let name = histogram_dataset(resource, kind, period);
                write_dataset(&config.data_dir, &name, &points)?;
                report.datasets.push(name);
            }
        }
    }

    debug!(
        entities = report.entities,
        datasets = report.datasets.len(),
        "Datasets exported"
    );
    Ok(report)
}

/// Flatten attributed values, chronological then by entity, dropping zeros
fn histogram_points(values: &BTreeMap<DateBucket, BTreeMap<String, f64>>) -> Vec<HistogramPoint> {
    values
        .iter()
        .flat_map(|(bucket, entities)| {
            entities.iter().filter_map(move |(name, value)| {
                let usage = round_output(*value);
                (usage > 0.0).then(|| HistogramPoint {
                    stack: name.clone(),
                    usage,
                    date: bucket.label.clone(),
                })
            })
        })
        .collect()
}

fn write_dataset<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<()> {
    let path = dir.join(format!("{name}.json"));
    write_json_atomic(&path, value).with_context(|| format!("Failed to write {}", path.display()))
}
