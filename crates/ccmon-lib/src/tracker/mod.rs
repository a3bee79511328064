//! Cluster state tracking
//!
//! Keeps the authoritative in-memory mirror of cluster nodes and of pods in
//! the watched namespace. Both maps live behind one reader-writer lock so a
//! snapshot always sees nodes, pods and prices from the same instant.
//!
//! Writes arrive from the two watch loops in [`watch`]; everything else
//! reads through [`ClusterStateTracker::snapshot`] or
//! [`ClusterStateTracker::totals`].

mod watch;


use crate::models::{
    CapacityType, ClusterSnapshot, ClusterTotals, ObservedNode, TrackedNode, TrackedPod,
};
use crate::observability::MonitorMetrics;
use crate::pricing::PricingOracle;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Default)]
struct TrackerState {
    nodes: HashMap<String, TrackedNode>,
    /// Keyed by pod UID
    pods: HashMap<String, TrackedPod>,
}

/// Owner of the tracked node and pod sets
pub struct ClusterStateTracker {
    state: RwLock<TrackerState>,
    pricing: Arc<dyn PricingOracle>,
    spot_aware: bool,
    metrics: MonitorMetrics,
}

impl ClusterStateTracker {
    pub fn new(pricing: Arc<dyn PricingOracle>) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            pricing,
            spot_aware: false,
            metrics: MonitorMetrics::new(),
        }
    }

    /// Price spot-capacity nodes from the spot table
    pub fn with_spot_pricing(mut self, enabled: bool) -> Self {
        self.spot_aware = enabled;
        self
    }

    fn resolve_price(&self, node: &ObservedNode) -> Option<f64> {
        let instance_type = node.instance_type.as_deref()?;
        if self.spot_aware && node.capacity_type == CapacityType::Spot {
            if let Some(price) = self.pricing.spot_price(instance_type) {
                return Some(price);
            }
        }
        self.pricing.on_demand_price(instance_type)
    }

    /// Insert or refresh a node, resolving its hourly price first
    pub async fn add_or_update_node(&self, node: ObservedNode) {
        let hourly_price = self.resolve_price(&node);

        let (known_miss, node_count, pod_count) = {
            let mut state = self.state.write().await;
            let known_miss = state
                .nodes
                .get(&node.name)
                .map_or(false, |n| n.hourly_price.is_none());
            state.nodes.insert(
                node.name.clone(),
                TrackedNode {
                    name: node.name.clone(),
                    instance_type: node.instance_type.clone(),
                    capacity_type: node.capacity_type,
                    hourly_price,
                },
            );
            (known_miss, state.nodes.len(), state.pods.len())
        };
        self.metrics.set_tracked(node_count, pod_count);

        match hourly_price {
            Some(price) => debug!(node = %node.name, hourly_price = price, "Tracking node"),
            None => {
                self.metrics.inc_price_lookup_misses();
                if known_miss {
                    debug!(node = %node.name, "Node still has no price");
                } else {
                    warn!(
                        node = %node.name,
                        instance_type = ?node.instance_type,
                        "No price for node, tracking with zero cost"
                    );
                }
            }
        }
    }

    pub async fn remove_node(&self, name: &str) {
        let mut state = self.state.write().await;
        if state.nodes.remove(name).is_some() {
            debug!(node = %name, "Node removed");
        }
        self.metrics.set_tracked(state.nodes.len(), state.pods.len());
    }

    pub async fn add_or_update_pod(&self, pod: TrackedPod) {
        let mut state = self.state.write().await;
        state.pods.insert(pod.uid.clone(), pod);
        self.metrics.set_tracked(state.nodes.len(), state.pods.len());
    }

    pub async fn remove_pod(&self, uid: &str) {
        let mut state = self.state.write().await;
        state.pods.remove(uid);
        self.metrics.set_tracked(state.nodes.len(), state.pods.len());
    }

    /// Copy of the tracked sets, sorted by key
    pub async fn snapshot(&self) -> ClusterSnapshot {
        let state = self.state.read().await;
        let mut nodes: Vec<_> = state.nodes.values().cloned().collect();
        let mut pods: Vec<_> = state.pods.values().cloned().collect();
        let pending_pods = pods.iter().filter(|p| p.phase.is_pending()).count();
        drop(state);

        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        pods.sort_by(|a, b| a.uid.cmp(&b.uid));
        ClusterSnapshot {
            nodes,
            pods,
            pending_pods,
        }
    }

    /// Counts and burn rate without copying the sets
    pub async fn totals(&self) -> ClusterTotals {
        let state = self.state.read().await;
        ClusterTotals {
            node_count: state.nodes.len(),
            pod_count: state.pods.len(),
            pending_pods: state.pods.values().filter(|p| p.phase.is_pending()).count(),
            hourly_cost: state.nodes.values().filter_map(|n| n.hourly_price).sum(),
        }
    }

    /// Resolved prices of tracked nodes; nodes without a price are absent
    pub async fn node_prices(&self) -> HashMap<String, f64> {
        let state = self.state.read().await;
        state
            .nodes
            .values()
            .filter_map(|n| n.hourly_price.map(|p| (n.name.clone(), p)))
            .collect()
    }
}
