//! Per-cycle cluster snapshot construction
//!
//! A snapshot is built fresh on every polling cycle from the raw API
//! payloads. The extraction order matters: namespaces before pods, nodes
//! before node metrics, pods before pod metrics. Metrics for objects the
//! snapshot does not know about are dropped.

use super::filter::NamespaceFilter;
use crate::error::SnapshotError;
use crate::models::{pod_key, NamespaceAccounting, Node, NodeState, Pod, PodState};
use crate::quantity::decode;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// In-memory view of the cluster for one polling cycle
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub(super) filter: NamespaceFilter,
    pub(super) nodes: BTreeMap<String, Node>,
    pub(super) pods: BTreeMap<String, Pod>,
    pub(super) namespaces: BTreeMap<String, NamespaceAccounting>,
}

impl ClusterSnapshot {
    /// Create an empty snapshot applying the given namespace filter
    pub fn new(filter: NamespaceFilter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn nodes(&self) -> &BTreeMap<String, Node> {
        &self.nodes
    }

    pub fn pods(&self) -> &BTreeMap<String, Pod> {
        &self.pods
    }

    /// Per-namespace accounting entries, keyed by namespace name
    pub fn namespaces(&self) -> &BTreeMap<String, NamespaceAccounting> {
        &self.namespaces
    }

    /// Create a zeroed accounting entry for every admitted namespace
    pub fn initialize_namespaces(&mut self, payload: Option<&str>) -> Result<(), SnapshotError> {
        for item in parse_items::<NamespaceItem>("namespaces", payload)? {
            let name = item.metadata.name;
            if name.is_empty() || !self.filter.allow(&name) {
                continue;
            }
            self.namespaces.insert(name, NamespaceAccounting::default());
        }
        Ok(())
    }

    /// Build node entries from the node list
    pub fn extract_nodes(&mut self, payload: Option<&str>) -> Result<(), SnapshotError> {
        for item in parse_items::<NodeItem>("nodes", payload)? {
            if item.metadata.name.is_empty() {
                debug!("Skipping node without a name");
                continue;
            }

            let mut node = Node {
                id: item.metadata.uid,
                name: item.metadata.name,
                cpu_capacity: item.status.capacity.cpu(),
                cpu_allocatable: item.status.allocatable.cpu(),
                mem_capacity: item.status.capacity.memory(),
                mem_allocatable: item.status.allocatable.memory(),
                container_runtime: item.status.node_info.container_runtime_version,
                ..Default::default()
            };

            for condition in &item.status.conditions {
                node.message = condition.message.clone();
                if let Some(state) = NodeState::from_condition(&condition.kind, &condition.status) {
                    node.state = Some(state);
                    break;
                }
            }

            self.nodes.insert(node.name.clone(), node);
        }
        Ok(())
    }

    /// Attach usage figures to nodes already known to the snapshot
    pub fn extract_node_metrics(&mut self, payload: Option<&str>) -> Result<(), SnapshotError> {
        for item in parse_items::<MetricsItem>("node_metrics", payload)? {
            match self.nodes.get_mut(&item.metadata.name) {
                Some(node) => {
                    node.cpu_usage = Some(item.usage.cpu());
                    node.mem_usage = Some(item.usage.memory());
                }
                None => debug!(node = %item.metadata.name, "Dropping metrics for unknown node"),
            }
        }
        Ok(())
    }

    /// Build pod entries for admitted namespaces from the pod list
    pub fn extract_pods(&mut self, payload: Option<&str>) -> Result<(), SnapshotError> {
        for item in parse_items::<PodItem>("pods", payload)? {
            let namespace = item.metadata.namespace;
            if !self.filter.allow(&namespace) {
                continue;
            }

            let mut pod = Pod {
                id: item.metadata.uid,
                name: pod_key(&item.metadata.name, &namespace),
                namespace,
                phase: item.status.phase,
                ..Default::default()
            };

            match &item.status.conditions {
                Some(conditions) => {
                    pod.state = conditions
                        .iter()
                        .find_map(|c| PodState::from_condition(&c.kind, &c.status))
                        .unwrap_or_default();
                }
                None => debug!(pod = %pod.name, "Pod has no conditions, keeping default state"),
            }

            if pod.state.is_scheduled() {
                pod.node_name = item.spec.node_name.filter(|n| !n.is_empty());
                let (cpu, mem) = item
                    .spec
                    .containers
                    .iter()
                    .fold((0.0, 0.0), |(cpu, mem), c| {
                        (cpu + c.resources.requests.cpu(), mem + c.resources.requests.memory())
                    });
                pod.cpu_request = Some(cpu);
                pod.mem_request = Some(mem);
            }

            self.pods.insert(pod.name.clone(), pod);
        }
        Ok(())
    }

    /// Attach usage figures, summed across containers, to known pods
    pub fn extract_pod_metrics(&mut self, payload: Option<&str>) -> Result<(), SnapshotError> {
        for item in parse_items::<MetricsItem>("pod_metrics", payload)? {
            let key = pod_key(&item.metadata.name, &item.metadata.namespace);
            let Some(pod) = self.pods.get_mut(&key) else {
                debug!(pod = %key, "Dropping metrics for unknown pod");
                continue;
            };

            let (cpu, mem) = item.containers.iter().fold((0.0, 0.0), |(cpu, mem), c| {
                (cpu + c.usage.cpu(), mem + c.usage.memory())
            });
            pod.cpu_usage = Some(cpu);
            pod.mem_usage = Some(mem);
        }
        Ok(())
    }
}

/// Parse a `{"items": [...]}` document, skipping items that do not decode
///
/// An absent payload yields no items. A payload that is not JSON at all is an
/// error for the whole cycle.
fn parse_items<T: for<'de> Deserialize<'de>>(
    endpoint: &'static str,
    payload: Option<&str>,
) -> Result<Vec<T>, SnapshotError> {
    let Some(payload) = payload else {
        return Ok(Vec::new());
    };

    let list: ItemList = serde_json::from_str(payload)
        .map_err(|source| SnapshotError::MalformedPayload { endpoint, source })?;

    let items = list
        .items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(endpoint, error = %e, "Skipping undecodable item");
                None
            }
        })
        .collect();

    Ok(items)
}

// Wire shapes. Every field defaults so absent substructures are tolerated.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ItemList {
    items: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ObjectMeta {
    name: String,
    namespace: String,
    uid: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResourceList {
    cpu: Option<String>,
    memory: Option<String>,
}

impl ResourceList {
    fn cpu(&self) -> f64 {
        self.cpu.as_deref().map(decode).unwrap_or(0.0)
    }

    fn memory(&self) -> f64 {
        self.memory.as_deref().map(decode).unwrap_or(0.0)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NamespaceItem {
    metadata: ObjectMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeItem {
    metadata: ObjectMeta,
    status: NodeStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct NodeStatus {
    capacity: ResourceList,
    allocatable: ResourceList,
    node_info: NodeInfo,
    conditions: Vec<Condition>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct NodeInfo {
    container_runtime_version: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PodItem {
    metadata: ObjectMeta,
    spec: PodSpec,
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PodSpec {
    node_name: Option<String>,
    containers: Vec<ContainerSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContainerSpec {
    resources: ContainerResources,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContainerResources {
    requests: ResourceList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PodStatus {
    phase: String,
    conditions: Option<Vec<Condition>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetricsItem {
    metadata: ObjectMeta,
    usage: ResourceList,
    containers: Vec<ContainerUsage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContainerUsage {
    usage: ResourceList,
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODES: &str = r#"{"items": [
        {"metadata": {"name": "node-1", "uid": "u1"},
         "status": {
            "capacity": {"cpu": "4", "memory": "16Gi"},
            "allocatable": {"cpu": "3500m", "memory": "15Gi"},
            "nodeInfo": {"containerRuntimeVersion": "containerd://1.7.0"},
            "conditions": [
                {"type": "MemoryPressure", "status": "False", "message": "ok"},
                {"type": "Ready", "status": "True", "message": "kubelet is posting ready status"},
                {"type": "DiskPressure", "status": "True", "message": "late"}
            ]}},
        {"metadata": {"name": "node-2", "uid": "u2"},
         "status": {"capacity": {"cpu": "8"}, "allocatable": {"cpu": "7500m"}}}
    ]}"#;

    #[test]
    fn test_extract_nodes_first_matching_condition_wins() {
        let mut snapshot = ClusterSnapshot::default();
        snapshot.extract_nodes(Some(NODES)).unwrap();

        let node = &snapshot.nodes()["node-1"];
        assert_eq!(node.id, "u1");
        assert_eq!(node.state, Some(NodeState::Ready));
        assert_eq!(node.message, "kubelet is posting ready status");
        assert_eq!(node.cpu_capacity, 4.0);
        assert_eq!(node.cpu_allocatable, 3.5);
        assert_eq!(node.mem_capacity, 16.0 * 1024.0 * 1024.0 * 1024.0);
        assert_eq!(node.container_runtime, "containerd://1.7.0");

        let bare = &snapshot.nodes()["node-2"];
        assert_eq!(bare.state, None);
        assert_eq!(bare.mem_capacity, 0.0);
        assert_eq!(bare.cpu_allocatable, 7.5);
    }

    #[test]
    fn test_node_metrics_for_unknown_node_are_dropped() {
        let mut snapshot = ClusterSnapshot::default();
        snapshot.extract_nodes(Some(NODES)).unwrap();
        snapshot
            .extract_node_metrics(Some(
                r#"{"items": [
                    {"metadata": {"name": "node-1"}, "usage": {"cpu": "250m", "memory": "1Gi"}},
                    {"metadata": {"name": "ghost"}, "usage": {"cpu": "1", "memory": "1Gi"}}
                ]}"#,
            ))
            .unwrap();

        assert_eq!(snapshot.nodes().len(), 2);
        assert_eq!(snapshot.nodes()["node-1"].cpu_usage, Some(0.25));
        assert_eq!(snapshot.nodes()["node-2"].cpu_usage, None);
    }

    #[test]
    fn test_absent_payload_is_noop() {
        let mut snapshot = ClusterSnapshot::default();
        snapshot.initialize_namespaces(None).unwrap();
        snapshot.extract_nodes(None).unwrap();
        snapshot.extract_pods(None).unwrap();
        assert!(snapshot.nodes().is_empty());
        assert!(snapshot.namespaces().is_empty());
    }

    #[test]
    fn test_malformed_top_level_payload_is_an_error() {
        let mut snapshot = ClusterSnapshot::default();
        let err = snapshot.extract_nodes(Some("<html>bad gateway</html>")).unwrap_err();
        assert!(err.to_string().contains("nodes"));
    }

    #[test]
    fn test_missing_items_key_yields_nothing() {
        let mut snapshot = ClusterSnapshot::default();
        snapshot.extract_nodes(Some(r#"{"kind": "NodeList"}"#)).unwrap();
        assert!(snapshot.nodes().is_empty());
    }

    #[test]
    fn test_initialize_namespaces_applies_filter() {
        let mut snapshot = ClusterSnapshot::new(NamespaceFilter::from_lists("*", "kube-*"));
        snapshot
            .initialize_namespaces(Some(
                r#"{"items": [
                    {"metadata": {"name": "default"}},
                    {"metadata": {"name": "kube-system"}},
                    {"metadata": {"name": "team-a"}}
                ]}"#,
            ))
            .unwrap();

        let names: Vec<&str> = snapshot.namespaces().keys().map(String::as_str).collect();
        assert_eq!(names, ["default", "team-a"]);
        assert_eq!(snapshot.namespaces()["default"], NamespaceAccounting::default());
    }

    #[test]
    fn test_extract_pods_states_and_requests() {
        let mut snapshot = ClusterSnapshot::new(NamespaceFilter::from_lists("", "kube-*"));
        snapshot
            .extract_pods(Some(
                r#"{"items": [
                    {"metadata": {"name": "web", "namespace": "default", "uid": "p1"},
                     "spec": {"nodeName": "node-1", "containers": [
                        {"resources": {"requests": {"cpu": "100m", "memory": "64Mi"}}},
                        {"resources": {}},
                        {"resources": {"requests": {"cpu": "400m"}}}
                     ]},
                     "status": {"phase": "Running", "conditions": [
                        {"type": "Initialized", "status": "True"},
                        {"type": "Ready", "status": "True"}
                     ]}},
                    {"metadata": {"name": "pending", "namespace": "default"},
                     "spec": {"containers": []},
                     "status": {"phase": "Pending", "conditions": [
                        {"type": "PodScheduled", "status": "False"}
                     ]}},
                    {"metadata": {"name": "bare", "namespace": "default"},
                     "spec": {"nodeName": "node-1"},
                     "status": {"phase": "Pending"}},
                    {"metadata": {"name": "dns", "namespace": "kube-system"},
                     "status": {"phase": "Running"}}
                ]}"#,
            ))
            .unwrap();

        assert_eq!(snapshot.pods().len(), 3);

        let web = &snapshot.pods()["web.default"];
        assert_eq!(web.id, "p1");
        assert_eq!(web.state, PodState::Initialized);
        assert_eq!(web.node_name.as_deref(), Some("node-1"));
        assert!((web.cpu_request.unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(web.mem_request, Some(64.0 * 1024.0 * 1024.0));

        let pending = &snapshot.pods()["pending.default"];
        assert_eq!(pending.state, PodState::PodNotScheduled);
        assert_eq!(pending.node_name, None);
        assert_eq!(pending.requests(), None);

        let bare = &snapshot.pods()["bare.default"];
        assert_eq!(bare.state, PodState::PodNotScheduled);
        assert_eq!(bare.node_name, None);
    }

    #[test]
    fn test_pod_metrics_sum_containers_and_skip_unknown() {
        let mut snapshot = ClusterSnapshot::default();
        snapshot
            .extract_pods(Some(
                r#"{"items": [{"metadata": {"name": "web", "namespace": "default"}}]}"#,
            ))
            .unwrap();
        snapshot
            .extract_pod_metrics(Some(
                r#"{"items": [
                    {"metadata": {"name": "web", "namespace": "default"}, "containers": [
                        {"usage": {"cpu": "250m", "memory": "100Mi"}},
                        {"usage": {"cpu": "250000000n", "memory": "28Mi"}}
                    ]},
                    {"metadata": {"name": "web", "namespace": "other"}, "containers": [
                        {"usage": {"cpu": "1", "memory": "1Gi"}}
                    ]}
                ]}"#,
            ))
            .unwrap();

        assert_eq!(snapshot.pods().len(), 1);
        let web = &snapshot.pods()["web.default"];
        assert!((web.cpu_usage.unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(web.mem_usage, Some(128.0 * 1024.0 * 1024.0));
    }

    #[test]
    fn test_undecodable_item_is_skipped() {
        let mut snapshot = ClusterSnapshot::default();
        snapshot
            .extract_nodes(Some(
                r#"{"items": [
                    {"metadata": {"name": 42}},
                    {"metadata": {"name": "node-ok"}}
                ]}"#,
            ))
            .unwrap();
        assert_eq!(snapshot.nodes().len(), 1);
        assert!(snapshot.nodes().contains_key("node-ok"));
    }
}
