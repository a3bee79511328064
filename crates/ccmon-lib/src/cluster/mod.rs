//! Cluster API seams
//!
//! The monitor talks to the cluster through three narrow traits so the
//! tracker, scheduler and runner can be driven by fakes in tests:
//! - [`ChangeFeed`]: a subscription to node or pod change notifications
//! - [`ScaleClient`]: read/write of a workload's scale subresource
//! - [`ClusterApi`]: workload creation and deletion

mod k8s;
mod workload;

pub use k8s::{connect, node_from_k8s, pod_from_k8s, KubeCluster, KubeNodeFeed, KubePodFeed};
pub use workload::{build_deployment, OWNER_LABEL, PAUSE_IMAGE};

use crate::error::ClusterError;
use crate::scenario::WorkloadSpec;
use anyhow::Result;
use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

/// A single change notification
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

/// Stream of change notifications; ends when the server closes the watch
pub type FeedStream<T> = Pin<Box<dyn Stream<Item = Result<FeedEvent<T>>> + Send>>;

/// Source of change notifications for one kind of object
#[async_trait]
pub trait ChangeFeed<T>: Send + Sync {
    /// Short name used in logs and metrics labels
    fn name(&self) -> &'static str;

    /// Open a fresh subscription
    async fn subscribe(&self) -> Result<FeedStream<T>>;
}

/// Current scale of a workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadScale {
    pub replicas: i32,
    /// Version token for optimistic concurrency on write-back
    pub resource_version: Option<String>,
}

/// Scale subresource access
#[async_trait]
pub trait ScaleClient: Send + Sync {
    async fn get_scale(&self, workload: &str) -> Result<WorkloadScale, ClusterError>;

    /// Write back a scale previously read; fails with
    /// [`ClusterError::Conflict`] when the version is stale
    async fn update_scale(&self, workload: &str, scale: &WorkloadScale) -> Result<(), ClusterError>;
}

/// Workload lifecycle
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create the workload with zero replicas
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), ClusterError>;

    async fn delete_workload(&self, resource_name: &str) -> Result<(), ClusterError>;
}
