//! Core data models for the cost monitor

use serde::{Deserialize, Serialize};

/// Scheduling phase of a tracked pod
///
/// Only the distinction between pending and everything else matters for
/// pending-pod accounting; `Running` is kept for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodPhase {
    Pending,
    Running,
    Other,
}

impl PodPhase {
    /// Map a Kubernetes `status.phase` string to a phase
    pub fn from_status(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            _ => PodPhase::Other,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, PodPhase::Pending)
    }
}

/// Capacity type a node was provisioned with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityType {
    #[default]
    OnDemand,
    Spot,
}

/// A node as reported by the node change feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedNode {
    pub name: String,
    pub instance_type: Option<String>,
    pub capacity_type: CapacityType,
}

impl ObservedNode {
    pub fn new(name: impl Into<String>, instance_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_type: Some(instance_type.into()),
            capacity_type: CapacityType::OnDemand,
        }
    }
}

/// Local mirror of a cluster node with its resolved hourly price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedNode {
    pub name: String,
    pub instance_type: Option<String>,
    pub capacity_type: CapacityType,
    /// Absent when the pricing lookup missed
    pub hourly_price: Option<f64>,
}

/// Local mirror of a pod in the watched namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedPod {
    pub uid: String,
    pub name: String,
    pub phase: PodPhase,
}

impl TrackedPod {
    pub fn new(uid: impl Into<String>, name: impl Into<String>, phase: PodPhase) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            phase,
        }
    }
}

/// Aggregate view of the tracker taken under one lock acquisition
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterTotals {
    pub node_count: usize,
    pub pod_count: usize,
    pub pending_pods: usize,
    /// Sum of hourly prices over all tracked nodes with a known price
    pub hourly_cost: f64,
}

/// Full copy of the tracker state taken under one lock acquisition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub nodes: Vec<TrackedNode>,
    pub pods: Vec<TrackedPod>,
    pub pending_pods: usize,
}

impl ClusterSnapshot {
    /// Instantaneous burn rate of the snapshot's nodes
    pub fn hourly_cost(&self) -> f64 {
        self.nodes.iter().filter_map(|n| n.hourly_price).sum()
    }
}

/// One row of the telemetry record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostSample {
    /// Seconds since scenario start
    pub elapsed_secs: f64,
    pub node_count: usize,
    pub hourly_cost: f64,
    pub cumulative_cost: f64,
    pub pod_count: usize,
    pub pending_pods: usize,
    pub pending_pod_seconds: f64,
}
