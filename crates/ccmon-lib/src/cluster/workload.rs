//! Placeholder workload manifests

use crate::scenario::WorkloadSpec;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;

/// Label marking objects created by the monitor
pub const OWNER_LABEL: (&str, &str) = ("ccmon", "owned");

/// Image that requests resources without consuming them
pub const PAUSE_IMAGE: &str = "public.ecr.aws/eks-distro/kubernetes/pause:3.2";

/// Build the zero-replica deployment backing a scenario workload
pub fn build_deployment(spec: &WorkloadSpec, namespace: &str) -> Deployment {
    let name = spec.resource_name();

    let selector_labels = BTreeMap::from([("app".to_string(), name.clone())]);
    let mut pod_labels = selector_labels.clone();
    pod_labels.insert(OWNER_LABEL.0.to_string(), OWNER_LABEL.1.to_string());

    let requests = BTreeMap::from([
        ("cpu".to_string(), spec.cpu.clone()),
        ("memory".to_string(), spec.memory.clone()),
    ]);

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                OWNER_LABEL.0.to_string(),
                OWNER_LABEL.1.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(0),
            selector: LabelSelector {
                match_labels: Some(selector_labels),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(name),
                    namespace: Some(namespace.to_string()),
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "container".to_string(),
                        image: Some(PAUSE_IMAGE.to_string()),
                        resources: Some(ResourceRequirements {
                            requests: Some(requests),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn spec() -> WorkloadSpec {
        WorkloadSpec {
            name: "big pods".to_string(),
            cpu: Quantity("2".to_string()),
            memory: Quantity("4Gi".to_string()),
        }
    }

    #[test]
    fn test_deployment_starts_at_zero_replicas() {
        let dep = build_deployment(&spec(), "bench");

        assert_eq!(dep.metadata.name.as_deref(), Some("ccmon-big-pods"));
        assert_eq!(dep.metadata.namespace.as_deref(), Some("bench"));
        let dep_spec = dep.spec.unwrap();
        assert_eq!(dep_spec.replicas, Some(0));
        assert_eq!(
            dep_spec.selector.match_labels.unwrap().get("app").map(String::as_str),
            Some("ccmon-big-pods")
        );
    }

    #[test]
    fn test_pod_template_requests_and_labels() {
        let dep = build_deployment(&spec(), "default");
        let template = dep.spec.unwrap().template;

        let labels = template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels.get("ccmon").map(String::as_str), Some("owned"));
        assert_eq!(labels.get("app").map(String::as_str), Some("ccmon-big-pods"));

        let container = &template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some(PAUSE_IMAGE));
        let requests = container.resources.clone().unwrap().requests.unwrap();
        assert_eq!(requests["cpu"].0, "2");
        assert_eq!(requests["memory"].0, "4Gi");
    }
}
