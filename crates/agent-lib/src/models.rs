//! Core data models for the resource-accounting pipeline

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// A CPU/memory figure pair in base units (cores, bytes) or percent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcePair {
    pub cpu: f64,
    pub mem: f64,
}

impl ResourcePair {
    pub const ZERO: ResourcePair = ResourcePair { cpu: 0.0, mem: 0.0 };

    pub fn new(cpu: f64, mem: f64) -> Self {
        Self { cpu, mem }
    }
}

impl Add for ResourcePair {
    type Output = ResourcePair;

    fn add(self, rhs: Self) -> Self::Output {
        ResourcePair::new(self.cpu + rhs.cpu, self.mem + rhs.mem)
    }
}

impl AddAssign for ResourcePair {
    fn add_assign(&mut self, rhs: Self) {
        self.cpu += rhs.cpu;
        self.mem += rhs.mem;
    }
}

/// Node lifecycle state derived from `status.conditions`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Ready,
    KernelDeadlock,
    NetworkUnavailable,
    OutOfDisk,
    MemoryPressure,
    DiskPressure,
    Unknown,
}

impl NodeState {
    /// Map a node condition to a state, if the condition is a recognized one
    ///
    /// A `Ready` condition whose status is `"Unknown"` means the kubelet
    /// stopped reporting, which maps to [`NodeState::Unknown`].
    pub fn from_condition(condition_type: &str, status: &str) -> Option<Self> {
        if condition_type == "Ready" && status == "Unknown" {
            return Some(NodeState::Unknown);
        }
        if status != "True" {
            return None;
        }
        match condition_type {
            "Ready" => Some(NodeState::Ready),
            "KernelDeadlock" => Some(NodeState::KernelDeadlock),
            "NetworkUnavailable" => Some(NodeState::NetworkUnavailable),
            "OutOfDisk" => Some(NodeState::OutOfDisk),
            "MemoryPressure" => Some(NodeState::MemoryPressure),
            "DiskPressure" => Some(NodeState::DiskPressure),
            _ => None,
        }
    }
}

/// Pod scheduling state derived from `status.conditions`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodState {
    #[default]
    PodNotScheduled,
    PodScheduled,
    Initialized,
    ContainersReady,
    Ready,
}

impl PodState {
    /// Map a pod condition to a state, if the condition is true and recognized
    pub fn from_condition(condition_type: &str, status: &str) -> Option<Self> {
        if status != "True" {
            return None;
        }
        match condition_type {
            "Ready" => Some(PodState::Ready),
            "ContainersReady" => Some(PodState::ContainersReady),
            "PodScheduled" => Some(PodState::PodScheduled),
            "Initialized" => Some(PodState::Initialized),
            _ => None,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        !matches!(self, PodState::PodNotScheduled)
    }
}

/// A pod as seen during one polling cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub id: String,
    /// Composite key `<name>.<namespace>`
    pub name: String,
    pub namespace: String,
    pub node_name: Option<String>,
    pub phase: String,
    pub state: PodState,
    pub cpu_usage: Option<f64>,
    pub mem_usage: Option<f64>,
    pub cpu_request: Option<f64>,
    pub mem_request: Option<f64>,
}

impl Pod {
    /// Usage summed across containers, if a metrics sample was seen
    pub fn usage(&self) -> Option<ResourcePair> {
        Some(ResourcePair::new(self.cpu_usage?, self.mem_usage?))
    }

    /// Requests summed across containers, if the pod is scheduled
    pub fn requests(&self) -> Option<ResourcePair> {
        Some(ResourcePair::new(self.cpu_request?, self.mem_request?))
    }
}

/// Build the composite pod key used to join pods with their metrics
pub fn pod_key(name: &str, namespace: &str) -> String {
    format!("{}.{}", name, namespace)
}

/// A node as seen during one polling cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(with = "state_or_empty")]
    pub state: Option<NodeState>,
    pub message: String,
    pub cpu_capacity: f64,
    pub cpu_allocatable: f64,
    pub cpu_usage: Option<f64>,
    pub mem_capacity: f64,
    pub mem_allocatable: f64,
    pub mem_usage: Option<f64>,
    pub container_runtime: String,
    pub pods_running: Vec<Pod>,
    pub pods_not_running: Vec<Pod>,
}

impl Node {
    pub fn capacity(&self) -> ResourcePair {
        ResourcePair::new(self.cpu_capacity, self.mem_capacity)
    }

    pub fn allocatable(&self) -> ResourcePair {
        ResourcePair::new(self.cpu_allocatable, self.mem_allocatable)
    }

    pub fn usage(&self) -> Option<ResourcePair> {
        Some(ResourcePair::new(self.cpu_usage?, self.mem_usage?))
    }
}

/// Per-namespace totals accumulated over one polling cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceAccounting {
    pub usage: ResourcePair,
    pub requests: ResourcePair,
}

/// Serializes an unset node state as `""`
mod state_or_empty {
    use super::NodeState;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(state: &Option<NodeState>, s: S) -> Result<S::Ok, S::Error> {
        match state {
            Some(state) => state.serialize(s),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NodeState>, D::Error> {
        let raw = String::deserialize(d)?;
        if raw.is_empty() {
            return Ok(None);
        }
        NodeState::deserialize(serde::de::value::StringDeserializer::<D::Error>::new(raw))
            .map(Some)
    }
}
