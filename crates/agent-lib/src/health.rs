//! Component health for liveness and readiness probes
//!
//! The collector, the exporter and the series store each report their own
//! status; the overall status is the worst of them. The agent is ready once
//! a collection cycle has completed, and the collector turns unhealthy when
//! no cycle completed within the staleness window.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still operational, e.g. a cycle ran on partial data
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the status was last reported (Unix seconds)
    pub updated_at: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    /// Completion time of the last collection cycle
    pub last_cycle_timestamp: Option<i64>,
    /// Completion time of the last dataset export
    pub last_export_timestamp: Option<i64>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const COLLECTOR: &str = "collector";
    pub const EXPORTER: &str = "exporter";
    pub const STORE: &str = "store";

    /// Every component the agent registers at startup
    pub const ALL: [&str; 3] = [COLLECTOR, EXPORTER, STORE];
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<String, ComponentHealth>,
    last_cycle: Option<i64>,
    last_export: Option<i64>,
}

/// Shared health state, cheap to clone into every loop
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
    /// Collector is unhealthy past this many seconds without a cycle
    stale_after: Option<i64>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the collector unhealthy when no cycle completed for `window`
    pub fn with_stale_after(mut self, window: Duration) -> Self {
        self.stale_after = Some(window.as_secs() as i64);
        self
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    /// Register every known component
    pub async fn register_all(&self) {
        for name in components::ALL {
            self.register(name).await;
        }
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut state = self.state.write().await;
        state.components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Record a completed collection cycle; the first one makes the agent ready
    pub async fn record_cycle(&self, timestamp: i64) {
        self.state.write().await.last_cycle = Some(timestamp);
    }

    pub async fn record_export(&self, timestamp: i64) {
        self.state.write().await.last_export = Some(timestamp);
    }

    pub async fn health(&self) -> HealthResponse {
        self.health_at(chrono::Utc::now().timestamp()).await
    }

    /// Health as of `now` (Unix seconds)
    pub async fn health_at(&self, now: i64) -> HealthResponse {
        let state = self.state.read().await;
        let mut components = state.components.clone();

        if let (Some(window), Some(last)) = (self.stale_after, state.last_cycle) {
            if now - last > window {
                components.insert(
                    components::COLLECTOR.to_string(),
                    ComponentHealth::unhealthy(format!(
                        "No collection cycle completed for {}s",
                        now - last
                    )),
                );
            }
        }

        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse {
            status,
            components,
            last_cycle_timestamp: state.last_cycle,
            last_export_timestamp: state.last_export,
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        self.readiness_at(chrono::Utc::now().timestamp()).await
    }

    pub async fn readiness_at(&self, now: i64) -> ReadinessResponse {
        let health = self.health_at(now).await;

        let reason = if health.last_cycle_timestamp.is_none() {
            Some("No collection cycle has completed yet".to_string())
        } else if health.status == ComponentStatus::Unhealthy {
            let failing: Vec<&str> = health
                .components
                .iter()
                .filter(|(_, c)| c.status == ComponentStatus::Unhealthy)
                .map(|(name, _)| name.as_str())
                .collect();
            Some(format!("Unhealthy: {}", failing.join(", ")))
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
