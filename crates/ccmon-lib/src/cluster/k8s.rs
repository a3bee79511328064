//! Kubernetes adapters for the cluster seams

use super::{ChangeFeed, ClusterApi, FeedEvent, FeedStream, ScaleClient, WorkloadScale};
use crate::error::ClusterError;
use crate::models::{CapacityType, ObservedNode, PodPhase, TrackedPod};
use crate::scenario::WorkloadSpec;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v1::{Scale, ScaleSpec};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams, WatchEvent, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::path::Path;
use tokio_stream::StreamExt;
use tracing::{debug, info};

const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";
const INSTANCE_TYPE_LABEL_BETA: &str = "beta.kubernetes.io/instance-type";
const KARPENTER_CAPACITY_LABEL: &str = "karpenter.sh/capacity-type";
const EKS_CAPACITY_LABEL: &str = "eks.amazonaws.com/capacityType";

/// Build a client from an explicit kubeconfig, or infer one from the
/// environment (`KUBECONFIG`, `~/.kube/config`, in-cluster service account)
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .context("Failed to load kubeconfig")?
        }
        None => kube::Config::infer()
            .await
            .context("Failed to infer kubernetes config")?,
    };

    info!(cluster_url = %config.cluster_url, "Connecting to cluster");
    Client::try_from(config).context("Failed to create kubernetes client")
}

/// Convert a Kubernetes node into the tracker's view
pub fn node_from_k8s(node: &Node) -> ObservedNode {
    let labels = node.metadata.labels.as_ref();
    let label = |key: &str| labels.and_then(|l| l.get(key)).cloned();

    let capacity_type = match (label(KARPENTER_CAPACITY_LABEL), label(EKS_CAPACITY_LABEL)) {
        (Some(v), _) if v == "spot" => CapacityType::Spot,
        (_, Some(v)) if v == "SPOT" => CapacityType::Spot,
        _ => CapacityType::OnDemand,
    };

    ObservedNode {
        name: node.metadata.name.clone().unwrap_or_default(),
        instance_type: label(INSTANCE_TYPE_LABEL).or_else(|| label(INSTANCE_TYPE_LABEL_BETA)),
        capacity_type,
    }
}

/// Convert a Kubernetes pod into the tracker's view
pub fn pod_from_k8s(pod: &Pod) -> TrackedPod {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let uid = pod.metadata.uid.clone().unwrap_or_else(|| {
        format!(
            "{}/{}",
            pod.metadata.namespace.as_deref().unwrap_or_default(),
            name
        )
    });
    let phase = PodPhase::from_status(pod.status.as_ref().and_then(|s| s.phase.as_deref()));

    TrackedPod { uid, name, phase }
}

fn convert_event<K, T>(
    event: kube::Result<WatchEvent<K>>,
    convert: fn(&K) -> T,
) -> Option<Result<FeedEvent<T>>> {
    match event {
        Ok(WatchEvent::Added(obj)) => Some(Ok(FeedEvent::Added(convert(&obj)))),
        Ok(WatchEvent::Modified(obj)) => Some(Ok(FeedEvent::Modified(convert(&obj)))),
        Ok(WatchEvent::Deleted(obj)) => Some(Ok(FeedEvent::Deleted(convert(&obj)))),
        Ok(WatchEvent::Bookmark(_)) => None,
        Ok(WatchEvent::Error(e)) => Some(Err(anyhow!(
            "watch error {}: {} ({})",
            e.code,
            e.message,
            e.reason
        ))),
        Err(e) => Some(Err(e.into())),
    }
}

fn classify(name: &str, err: kube::Error) -> ClusterError {
    match &err {
        kube::Error::Api(resp) if resp.code == 409 => ClusterError::Conflict(name.to_string()),
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(name.to_string()),
        _ => ClusterError::Kube(err),
    }
}

/// Node change feed, optionally filtered by a label selector
pub struct KubeNodeFeed {
    api: Api<Node>,
    selector: Option<String>,
}

impl KubeNodeFeed {
    pub fn new(client: Client, selector: Option<String>) -> Self {
        Self {
            api: Api::all(client),
            selector,
        }
    }
}

#[async_trait]
impl ChangeFeed<ObservedNode> for KubeNodeFeed {
    fn name(&self) -> &'static str {
        "nodes"
    }

    async fn subscribe(&self) -> Result<FeedStream<ObservedNode>> {
        let mut params = WatchParams::default();
        if let Some(selector) = &self.selector {
            params = params.labels(selector);
        }

        // resource version "0" replays current nodes as Added events
        let stream = self
            .api
            .watch(&params, "0")
            .await
            .context("Failed to watch nodes")?;
        Ok(Box::pin(
            stream.filter_map(|ev| convert_event(ev, node_from_k8s)),
        ))
    }
}

/// Pod change feed for one namespace
pub struct KubePodFeed {
    api: Api<Pod>,
}

impl KubePodFeed {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl ChangeFeed<TrackedPod> for KubePodFeed {
    fn name(&self) -> &'static str {
        "pods"
    }

    async fn subscribe(&self) -> Result<FeedStream<TrackedPod>> {
        let stream = self
            .api
            .watch(&WatchParams::default(), "0")
            .await
            .context("Failed to watch pods")?;
        Ok(Box::pin(stream.filter_map(|ev| convert_event(ev, pod_from_k8s))))
    }
}

/// Workload and scale access for one namespace
#[derive(Clone)]
pub struct KubeCluster {
    deployments: Api<Deployment>,
    namespace: String,
}

impl KubeCluster {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            deployments: Api::namespaced(client, &namespace),
            namespace,
        }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), ClusterError> {
        let deployment = super::build_deployment(spec, &self.namespace);
        let name = spec.resource_name();
        self.deployments
            .create(&PostParams::default(), &deployment)
            .await
            .map_err(|e| classify(&name, e))?;
        debug!(workload = %name, namespace = %self.namespace, "Created deployment");
        Ok(())
    }

    async fn delete_workload(&self, resource_name: &str) -> Result<(), ClusterError> {
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            ..DeleteParams::default()
        };
        self.deployments
            .delete(resource_name, &params)
            .await
            .map_err(|e| classify(resource_name, e))?;
        debug!(workload = %resource_name, "Deleted deployment");
        Ok(())
    }
}

#[async_trait]
impl ScaleClient for KubeCluster {
    async fn get_scale(&self, workload: &str) -> Result<WorkloadScale, ClusterError> {
        let scale = self
            .deployments
            .get_scale(workload)
            .await
            .map_err(|e| classify(workload, e))?;

        Ok(WorkloadScale {
            replicas: scale.spec.and_then(|s| s.replicas).unwrap_or(0),
            resource_version: scale.metadata.resource_version,
        })
    }

    async fn update_scale(&self, workload: &str, scale: &WorkloadScale) -> Result<(), ClusterError> {
        let body = Scale {
            metadata: ObjectMeta {
                name: Some(workload.to_string()),
                namespace: Some(self.namespace.clone()),
                resource_version: scale.resource_version.clone(),
                ..Default::default()
            },
            spec: Some(ScaleSpec {
                replicas: Some(scale.replicas),
            }),
            status: None,
        };
        let data = serde_json::to_vec(&body).map_err(|e| ClusterError::Other(e.to_string()))?;

        self.deployments
            .replace_scale(workload, &PostParams::default(), data)
            .await
            .map_err(|e| classify(workload, e))?;
        Ok(())
    }
}
