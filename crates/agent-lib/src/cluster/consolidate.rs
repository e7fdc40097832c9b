//! Consolidation of pod usage into namespace, node and cluster totals

use super::snapshot::ClusterSnapshot;
use crate::models::{NamespaceAccounting, ResourcePair};
use serde::Serialize;
use std::collections::BTreeMap;

/// Decimal precision of stored usage percentages
pub const PERCENT_PRECISION: i32 = 6;

/// Decimal precision of request efficiency ratios
pub const EFFICIENCY_PRECISION: i32 = 2;

/// Cluster-wide figures derived from one snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsolidatedTotals {
    /// Sum of node capacities
    pub capacity: ResourcePair,
    /// Sum of node allocatable figures
    pub allocatable: ResourcePair,
    /// Sum of usage of pods running on known nodes
    pub used_by_pods: ResourcePair,
    /// `100 * (capacity - allocatable) / capacity`
    pub non_allocatable_percent: ResourcePair,
    /// Namespace usage as a percentage of cluster capacity
    pub namespace_usage_percent: BTreeMap<String, ResourcePair>,
    /// Namespace usage divided by namespace requests
    pub namespace_efficiency: BTreeMap<String, ResourcePair>,
}

impl ConsolidatedTotals {
    /// Whether both CPU and memory capacity are known to be positive
    ///
    /// Cycles without capacity (API unreachable, empty cluster) must not
    /// produce time-series samples.
    pub fn has_capacity(&self) -> bool {
        self.capacity.cpu > 0.0 && self.capacity.mem > 0.0
    }
}

impl ClusterSnapshot {
    /// Aggregate pod usage into namespace and node totals
    ///
    /// Namespace accounting and node pod lists are rebuilt from scratch, so
    /// consolidating twice yields the same totals.
    pub fn consolidate(&mut self) -> ConsolidatedTotals {
        for accounting in self.namespaces.values_mut() {
            *accounting = NamespaceAccounting::default();
        }
        for node in self.nodes.values_mut() {
            node.pods_running.clear();
            node.pods_not_running.clear();
        }

        let mut totals = ConsolidatedTotals::default();

        for pod in self.pods.values() {
            let Some(node) = pod
                .node_name
                .as_ref()
                .and_then(|name| self.nodes.get_mut(name))
            else {
                continue;
            };

            let Some(usage) = pod.usage() else {
                node.pods_not_running.push(pod.clone());
                continue;
            };

            totals.used_by_pods += usage;
            if let Some(accounting) = self.namespaces.get_mut(&pod.namespace) {
                accounting.usage += usage;
                accounting.requests += pod.requests().unwrap_or(ResourcePair::ZERO);
            }
            node.pods_running.push(pod.clone());
        }

        for node in self.nodes.values() {
            totals.capacity += node.capacity();
            totals.allocatable += node.allocatable();
        }

        totals.non_allocatable_percent = ResourcePair::new(
            percent_of(totals.capacity.cpu - totals.allocatable.cpu, totals.capacity.cpu),
            percent_of(totals.capacity.mem - totals.allocatable.mem, totals.capacity.mem),
        );

        for (namespace, accounting) in &self.namespaces {
            totals.namespace_usage_percent.insert(
                namespace.clone(),
                ResourcePair::new(
                    percent_of(accounting.usage.cpu, totals.capacity.cpu),
                    percent_of(accounting.usage.mem, totals.capacity.mem),
                ),
            );
            totals.namespace_efficiency.insert(
                namespace.clone(),
                ResourcePair::new(
                    efficiency(accounting.usage.cpu, accounting.requests.cpu),
                    efficiency(accounting.usage.mem, accounting.requests.mem),
                ),
            );
        }

        totals
    }
}

/// Round `value` to `decimals` decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// `100 * value / total`, or 0 when the total is not positive
fn percent_of(value: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    round_to(100.0 * value / total, PERCENT_PRECISION).max(0.0)
}

/// Usage over request; an undeclared request counts as fully efficient
fn efficiency(usage: f64, request: f64) -> f64 {
    if request <= 0.0 {
        return 1.0;
    }
    round_to(usage / request, EFFICIENCY_PRECISION)
}
