//! Observability infrastructure for the opex analytics agent
//!
//! Provides:
//! - Prometheus metrics (per-namespace usage exports, collection latency, error counters)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_gauge, GaugeVec,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for a collection cycle (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OpexMetricsInner> = OnceLock::new();

struct OpexMetricsInner {
    namespace_hourly_usage: GaugeVec,
    namespace_periodic_usage: GaugeVec,
    namespace_periodic_requests: GaugeVec,
    collection_latency_seconds: Histogram,
    api_errors: IntCounter,
    store_write_errors: IntCounter,
    namespaces_tracked: IntGauge,
    nodes_tracked: IntGauge,
}

impl OpexMetricsInner {
    fn new() -> Self {
        Self {
            namespace_hourly_usage: register_gauge_vec!(
                "koa_namespace_hourly_usage",
                "Last hourly resource usage per namespace",
                &["namespace", "resource"]
            )
            .expect("Failed to register namespace_hourly_usage"),

            namespace_periodic_usage: register_gauge_vec!(
                "koa_namespace_periodic_usage",
                "Periodic resource usage per namespace",
                &["period", "namespace", "resource", "date"]
            )
            .expect("Failed to register namespace_periodic_usage"),

            namespace_periodic_requests: register_gauge_vec!(
                "koa_namespace_periodic_requests",
                "Periodic resource requests per namespace",
                &["period", "namespace", "resource", "date"]
            )
            .expect("Failed to register namespace_periodic_requests"),

            collection_latency_seconds: register_histogram!(
                "koa_collection_latency_seconds",
                "Time spent on one collection cycle against the cluster API",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            api_errors: register_int_counter!(
                "koa_api_errors_total",
                "Total number of failed cluster API calls"
            )
            .expect("Failed to register api_errors"),

            store_write_errors: register_int_counter!(
                "koa_store_write_errors_total",
                "Total number of dropped time-series samples"
            )
            .expect("Failed to register store_write_errors"),

            namespaces_tracked: register_int_gauge!(
                "koa_namespaces_tracked",
                "Number of namespaces accounted in the last collection cycle"
            )
            .expect("Failed to register namespaces_tracked"),

            nodes_tracked: register_int_gauge!(
                "koa_nodes_tracked",
                "Number of nodes seen in the last collection cycle"
            )
            .expect("Failed to register nodes_tracked"),
        }
    }
}

/// Opex metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct OpexMetrics {
    _private: (),
}

impl Default for OpexMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OpexMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpexMetrics").finish_non_exhaustive()
    }
}

impl OpexMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OpexMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OpexMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_collection_latency(&self, duration_secs: f64) {
        self.inner().collection_latency_seconds.observe(duration_secs);
    }

    pub fn inc_api_errors(&self) {
        self.inner().api_errors.inc();
    }

    pub fn inc_store_write_errors(&self) {
        self.inner().store_write_errors.inc();
    }

    /// Update the cluster size gauges after a collection cycle
    pub fn set_tracked(&self, nodes: usize, namespaces: usize) {
        self.inner().nodes_tracked.set(nodes as i64);
        self.inner().namespaces_tracked.set(namespaces as i64);
    }

    pub fn set_hourly_usage(&self, namespace: &str, resource: &str, value: f64) {
        self.inner()
            .namespace_hourly_usage
            .with_label_values(&[namespace, resource])
            .set(value);
    }

    pub fn set_periodic_usage(
        &self,
        period: &str,
        namespace: &str,
        resource: &str,
        date: &str,
        value: f64,
    ) {
        self.inner()
            .namespace_periodic_usage
            .with_label_values(&[period, namespace, resource, date])
            .set(value);
    }

    pub fn set_periodic_requests(
        &self,
        period: &str,
        namespace: &str,
        resource: &str,
        date: &str,
        value: f64,
    ) {
        self.inner()
            .namespace_periodic_requests
            .with_label_values(&[period, namespace, resource, date])
            .set(value);
    }

    /// Drop every per-namespace export gauge
    ///
    /// Called before an export refreshes them so that deleted namespaces
    /// and expired date buckets disappear from the exposition.
    pub fn reset_exports(&self) {
        self.inner().namespace_hourly_usage.reset();
        self.inner().namespace_periodic_usage.reset();
        self.inner().namespace_periodic_requests.reset();
    }
}

/// Structured logger for agent events
///
/// Provides consistent JSON-formatted logging for collection cycles,
/// exports, and other significant events.
#[derive(Clone, Debug)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, cost_model: &str, polling_interval_secs: u64) {
        info!(
            event = "agent_started",
            cluster = %self.cluster,
            agent_version = %version,
            cost_model = %cost_model,
            polling_interval_secs = polling_interval_secs,
            "Opex analytics agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Opex analytics agent shutting down"
        );
    }

    /// Log the outcome of one collection cycle
    pub fn log_cycle(
        &self,
        nodes: usize,
        pods: usize,
        namespaces: usize,
        failed_fetches: usize,
        samples_written: usize,
        duration_ms: u128,
    ) {
        if failed_fetches > 0 {
            warn!(
                event = "collection_cycle",
                cluster = %self.cluster,
                nodes = nodes,
                pods = pods,
                namespaces = namespaces,
                failed_fetches = failed_fetches,
                samples_written = samples_written,
                duration_ms = duration_ms as u64,
                "Collection cycle completed with partial data"
            );
        } else {
            info!(
                event = "collection_cycle",
                cluster = %self.cluster,
                nodes = nodes,
                pods = pods,
                namespaces = namespaces,
                samples_written = samples_written,
                duration_ms = duration_ms as u64,
                "Collection cycle completed"
            );
        }
    }

    /// Log the outcome of one export cycle
    pub fn log_export(&self, entities: usize, files: usize, cost_model: &str, duration_ms: u128) {
        info!(
            event = "export_cycle",
            cluster = %self.cluster,
            entities = entities,
            files = files,
            cost_model = %cost_model,
            duration_ms = duration_ms as u64,
            "Export cycle completed"
        );
    }

    /// Log a charge-back export without a usable billing rate
    pub fn log_charge_back_misconfigured(&self, hourly_rate: Option<f64>) {
        warn!(
            event = "charge_back_misconfigured",
            cluster = %self.cluster,
            hourly_rate = ?hourly_rate,
            "Charge-back cost model needs a strictly positive billing hourly rate, costs will be 0"
        );
    }
}
