//! Cluster collection loop
//!
//! Implements the loop that polls the cluster API once per interval, builds
//! a snapshot, consolidates it and records the resulting samples.

use super::{ApiEndpoint, ClusterSnapshot, ClusterSource, ConsolidatedTotals, NamespaceFilter};
use crate::health::{components, HealthRegistry};
use crate::observability::{OpexMetrics, StructuredLogger};
use crate::store::{write_json_atomic, Entity, SeriesStore};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// File name of the node snapshot written on every cycle
pub const NODES_FILE: &str = "nodes.json";

/// Configuration for the collection loop
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Polling interval, also the step of newly created series (default: 300 seconds)
    pub interval: Duration,
    /// Namespaces admitted into accounting
    pub filter: NamespaceFilter,
    /// Directory receiving the node snapshot file
    pub data_dir: PathBuf,
    /// Billing hourly rate recorded alongside usage, when configured
    pub billing_hourly_rate: Option<f64>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            filter: NamespaceFilter::default(),
            data_dir: PathBuf::from("./static/data"),
            billing_hourly_rate: None,
        }
    }
}

/// Outcome of one collection cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Snapshot after consolidation
    pub snapshot: ClusterSnapshot,
    pub totals: ConsolidatedTotals,
    /// Number of API calls that returned no payload
    pub failed_fetches: usize,
    pub samples_written: usize,
    pub samples_dropped: usize,
    /// Whether the node snapshot file was written
    pub nodes_written: bool,
}

/// Collection loop polling the cluster and feeding the series store
pub struct CollectorLoop {
    source: Arc<dyn ClusterSource>,
    store: Arc<SeriesStore>,
    config: CollectorConfig,
    health: HealthRegistry,
    metrics: OpexMetrics,
    logger: StructuredLogger,
}

impl CollectorLoop {
    pub fn new(
        source: Arc<dyn ClusterSource>,
        store: Arc<SeriesStore>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            source,
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

    /// Run cycles until a shutdown signal is received
    ///
    /// A failed cycle is logged and the loop waits for the next tick.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            data_dir = %self.config.data_dir.display(),
            "Starting cluster collection loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    if let Err(e) = self.run_cycle(now).await {
                        let message = format!("{e:#}");
                        error!(error = %message, "Collection cycle failed");
                        self.health.set_degraded(components::COLLECTOR, message).await;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down cluster collection loop");
                    break;
                }
            }
        }
    }

    /// Run one collection cycle stamped at `now` (Unix seconds)
    ///
    /// Fails only on a malformed payload or when samples cannot be handed
    /// to the store. Unreachable endpoints yield a partial snapshot and a
    /// node snapshot that cannot be written degrades the collector.
    pub async fn run_cycle(&self, now: i64) -> Result<CycleReport> {
        let start = Instant::now();
        let mut snapshot = ClusterSnapshot::new(self.config.filter.clone());
        let mut failed_fetches = 0;

        for endpoint in ApiEndpoint::ALL {
            let payload = self.source.fetch(endpoint).await;
            if payload.is_none() {
                failed_fetches += 1;
            }
            let payload = payload.as_deref();
            match endpoint {
                ApiEndpoint::Namespaces => snapshot.initialize_namespaces(payload),
                ApiEndpoint::Nodes => snapshot.extract_nodes(payload),
                ApiEndpoint::NodeMetrics => snapshot.extract_node_metrics(payload),
                ApiEndpoint::Pods => snapshot.extract_pods(payload),
                ApiEndpoint::PodMetrics => snapshot.extract_pod_metrics(payload),
            }?;
        }

        let totals = snapshot.consolidate();
        let nodes_written = match self.write_nodes(&snapshot).await {
            Ok(()) => true,
            Err(e) => {
                let message = format!("{e:#}");
                error!(error = %message, "Failed to write node snapshot");
                false
            }
        };

        let (samples_written, samples_dropped) = if totals.has_capacity() {
            self.record_samples(&totals, now).await?
        } else {
            debug!("Cluster capacity unknown, no samples recorded this cycle");
            (0, 0)
        };

        let elapsed = start.elapsed();
        self.metrics.observe_collection_latency(elapsed.as_secs_f64());
        self.metrics
            .set_tracked(snapshot.nodes().len(), snapshot.namespaces().len());
        self.logger.log_cycle(
            snapshot.nodes().len(),
            snapshot.pods().len(),
            snapshot.namespaces().len(),
            failed_fetches,
            samples_written,
            elapsed.as_millis(),
        );

        if failed_fetches > 0 {
            self.health
                .set_degraded(
                    components::COLLECTOR,
                    format!("{failed_fetches} of {} API calls failed", ApiEndpoint::ALL.len()),
                )
                .await;
        } else if !nodes_written {
            self.health
                .set_degraded(components::COLLECTOR, "Node snapshot not written")
                .await;
        } else {
            self.health.set_healthy(components::COLLECTOR).await;
        }
        if samples_dropped > 0 {
            self.health
                .set_degraded(
                    components::STORE,
                    format!("{samples_dropped} samples dropped"),
                )
                .await;
        } else {
            self.health.set_healthy(components::STORE).await;
        }
        self.health.record_cycle(now).await;

        Ok(CycleReport {
            snapshot,
            totals,
            failed_fetches,
            samples_written,
            samples_dropped,
            nodes_written,
        })
    }

    async fn write_nodes(&self, snapshot: &ClusterSnapshot) -> Result<()> {
        let path = self.config.data_dir.join(NODES_FILE);
        let nodes = snapshot.nodes().clone();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            write_json_atomic(&path, &nodes)
                .with_context(|| format!("Failed to write {}", path.display()))
        })
        .await
        .context("Node snapshot writer panicked")?
    }

    /// Write this cycle's samples, returning (written, dropped)
    async fn record_samples(
        &self,
        totals: &ConsolidatedTotals,
        now: i64,
    ) -> Result<(usize, usize)> {
        let mut samples = Vec::with_capacity(2 * totals.namespace_usage_percent.len() + 2);
        samples.push((
            Entity::NonAllocatable,
            totals.non_allocatable_percent.cpu,
            totals.non_allocatable_percent.mem,
        ));
        for (ns, usage) in &totals.namespace_usage_percent {
            samples.push((Entity::Namespace(ns.clone()), usage.cpu, usage.mem));
        }
        for (ns, efficiency) in &totals.namespace_efficiency {
            samples.push((
                Entity::RequestEfficiency(ns.clone()),
                efficiency.cpu,
                efficiency.mem,
            ));
        }
        match self.config.billing_hourly_rate {
            Some(rate) if rate > 0.0 => samples.push((Entity::BillingRate, rate, rate)),
            _ => {}
        }

        let expected = samples.len();
        let store = Arc::clone(&self.store);
        let written = tokio::task::spawn_blocking(move || {
            samples
                .iter()
                .filter(|(entity, cpu, mem)| store.append_sample(entity, now, *cpu, *mem))
                .count()
        })
        .await
        .context("Sample writer panicked")?;

        let dropped = expected.saturating_sub(written);
        if dropped > 0 {
            warn!(written = written, dropped = dropped, "Some samples were not recorded");
        }
        Ok((written, dropped))
    }
}

/// Builder for creating the collection loop
pub struct CollectorLoopBuilder {
    source: Option<Arc<dyn ClusterSource>>,
    store: Option<Arc<SeriesStore>>,
    config: CollectorConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl CollectorLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            source: None,
            store: None,
            config: CollectorConfig::default(),
            health: None,
            logger: None,
        }
    }

    pub fn source(mut self, source: Arc<dyn ClusterSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn store(mut self, store: Arc<SeriesStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: CollectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the polling interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the collection loop
    pub fn build(self) -> Result<CollectorLoop> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Cluster source is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Series store is required"))?;

        let mut collector = CollectorLoop::new(source, store, self.config);
        if let Some(health) = self.health {
            collector = collector.with_health(health);
        }
        if let Some(logger) = self.logger {
            collector = collector.with_logger(logger);
        }
        Ok(collector)
    }
}

impl Default for CollectorLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
