//! Cluster polling and snapshot construction
//!
//! This module fetches the five cluster API payloads (namespaces, nodes,
//! node metrics, pods, pod metrics), builds a per-cycle snapshot from them
//! and consolidates pod usage into namespace and cluster totals.

mod client;
mod consolidate;
mod filter;
mod r#loop;
mod snapshot;


pub use client::{ClusterAuth, ClusterClientConfig, K8sApiClient};
pub use consolidate::{round_to, ConsolidatedTotals, PERCENT_PRECISION};
pub use filter::{glob_match, NamespaceFilter};
pub use r#loop::{CollectorConfig, CollectorLoop, CollectorLoopBuilder, CycleReport, NODES_FILE};
pub use snapshot::ClusterSnapshot;

pub use async_trait::async_trait;

/// The cluster API endpoints polled on every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiEndpoint {
    Namespaces,
    Nodes,
    NodeMetrics,
    Pods,
    PodMetrics,
}

impl ApiEndpoint {
    /// All endpoints, in the order a cycle must consume them
    pub const ALL: [ApiEndpoint; 5] = [
        ApiEndpoint::Namespaces,
        ApiEndpoint::Nodes,
        ApiEndpoint::NodeMetrics,
        ApiEndpoint::Pods,
        ApiEndpoint::PodMetrics,
    ];

    /// Request path relative to the API server root
    pub fn path(&self) -> &'static str {
        match self {
            ApiEndpoint::Namespaces => "/api/v1/namespaces",
            ApiEndpoint::Nodes => "/api/v1/nodes",
            ApiEndpoint::NodeMetrics => "/apis/metrics.k8s.io/v1beta1/nodes",
            ApiEndpoint::Pods => "/api/v1/pods",
            ApiEndpoint::PodMetrics => "/apis/metrics.k8s.io/v1beta1/pods",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ApiEndpoint::Namespaces => "namespaces",
            ApiEndpoint::Nodes => "nodes",
            ApiEndpoint::NodeMetrics => "node_metrics",
            ApiEndpoint::Pods => "pods",
            ApiEndpoint::PodMetrics => "pod_metrics",
        }
    }
}

/// Source of raw cluster API payloads
#[async_trait]
pub trait ClusterSource: Send + Sync {
    /// Fetch the raw JSON body of an endpoint
    ///
    /// Any transport or status failure is logged by the implementation and
    /// reported as `None`; callers treat it as absent data.
    async fn fetch(&self, endpoint: ApiEndpoint) -> Option<String>;
}
