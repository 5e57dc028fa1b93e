use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, PodSpec, PodTemplateSpec, ResourceClaim, ResourceRequirements, Toleration,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use super::adapter::{AdapterTemplate, AdapterWorkload, Readiness};
use super::quantity::same_quantity;
use super::{labels_match, object_meta};

pub const ADAPTER_CONTAINER_NAME: &str = "adapter";

/// The container we run the adapter in, shared by Deployments and Knative Services.
pub(crate) fn adapter_container(template: &AdapterTemplate) -> Container {
    Container {
        name: ADAPTER_CONTAINER_NAME.into(),
        image: Some(template.image.clone()),
        env: Some(template.env.clone()),
        resources: template.resources.clone(),
        ..Default::default()
    }
}

pub(crate) fn find_adapter_container(containers: &[Container]) -> Option<&Container> {
    containers
        .iter()
        .find(|c| c.name == ADAPTER_CONTAINER_NAME)
}

/// Compares the container fields we manage.
pub(crate) fn container_diverges(current: Option<&Container>, desired: Option<&Container>) -> bool {
    let (Some(current), Some(desired)) = (current, desired) else {
        return current.is_some() != desired.is_some();
    };
    current.image != desired.image
        || current.env.as_deref().unwrap_or_default() != desired.env.as_deref().unwrap_or_default()
        || resources_diverge(current.resources.as_ref(), desired.resources.as_ref())
}

/// Quantities are compared by value, the API server returns `0.5` cpu as `500m`.
fn resources_diverge(
    current: Option<&ResourceRequirements>,
    desired: Option<&ResourceRequirements>,
) -> bool {
    fn limits(r: Option<&ResourceRequirements>) -> Option<&BTreeMap<String, Quantity>> {
        r.and_then(|r| r.limits.as_ref())
    }
    fn requests(r: Option<&ResourceRequirements>) -> Option<&BTreeMap<String, Quantity>> {
        r.and_then(|r| r.requests.as_ref())
    }
    fn claims(r: Option<&ResourceRequirements>) -> &[ResourceClaim] {
        r.and_then(|r| r.claims.as_deref()).unwrap_or_default()
    }
    quantities_diverge(limits(current), limits(desired))
        || quantities_diverge(requests(current), requests(desired))
        || claims(current) != claims(desired)
}

fn quantities_diverge(
    current: Option<&BTreeMap<String, Quantity>>,
    desired: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let empty = BTreeMap::new();
    let (current, desired) = (current.unwrap_or(&empty), desired.unwrap_or(&empty));
    current.len() != desired.len()
        || desired.iter().any(|(name, quantity)| {
            current
                .get(name)
                .is_none_or(|observed| !same_quantity(observed, quantity))
        })
}

/// Compares node selector and tolerations; unset and empty are the same.
pub(crate) fn scheduling_diverges(
    current: (Option<&BTreeMap<String, String>>, Option<&[Toleration]>),
    desired: (Option<&BTreeMap<String, String>>, Option<&[Toleration]>),
) -> bool {
    fn selector(s: Option<&BTreeMap<String, String>>) -> Option<&BTreeMap<String, String>> {
        s.filter(|s| !s.is_empty())
    }
    selector(current.0) != selector(desired.0)
        || current.1.unwrap_or_default() != desired.1.unwrap_or_default()
}

/// True if an annotation we set on the pod template is missing or has another value.
pub(crate) fn annotations_diverge(
    current: Option<&ObjectMeta>,
    desired: Option<&ObjectMeta>,
) -> bool {
    desired
        .and_then(|m| m.annotations.as_ref())
        .is_some_and(|a| !labels_match(a, current.and_then(|m| m.annotations.as_ref())))
}

fn pod_metadata(template: &AdapterTemplate) -> ObjectMeta {
    ObjectMeta {
        labels: Some(template.pod_labels.clone()),
        annotations: if template.pod_annotations.is_empty() {
            None
        } else {
            Some(template.pod_annotations.clone())
        },
        ..Default::default()
    }
}

pub(crate) fn pod_spec(template: &AdapterTemplate) -> PodSpec {
    PodSpec {
        containers: vec![adapter_container(template)],
        service_account_name: Some(template.service_account.clone()),
        node_selector: template.node_selector.clone(),
        tolerations: template.tolerations.clone(),
        ..Default::default()
    }
}

pub(crate) fn metadata(template: &AdapterTemplate, labels: BTreeMap<String, String>) -> ObjectMeta {
    object_meta(
        &template.name,
        &template.namespace,
        labels,
        template.owner_reference.iter().cloned().collect(),
    )
}

impl AdapterWorkload for Deployment {
    const WATCH_PODS: bool = true;

    fn from_template(template: &AdapterTemplate) -> Self {
        Deployment {
            metadata: metadata(template, template.labels.clone()),
            spec: Some(DeploymentSpec {
                replicas: Some(template.replicas.unwrap_or(1)),
                selector: LabelSelector {
                    match_labels: Some(template.labels.clone()),
                    match_expressions: None,
                },
                template: PodTemplateSpec {
                    metadata: Some(pod_metadata(template)),
                    spec: Some(pod_spec(template)),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    fn diverges_from(&self, desired: &Self) -> bool {
        let labels_diverge = desired
            .metadata
            .labels
            .as_ref()
            .is_some_and(|labels| !labels_match(labels, self.metadata.labels.as_ref()));
        if labels_diverge || self.metadata.owner_references != desired.metadata.owner_references {
            return true;
        }

        let (Some(current), Some(desired)) = (&self.spec, &desired.spec) else {
            return self.spec.is_some() != desired.spec.is_some();
        };
        if current.replicas != desired.replicas {
            return true;
        }

        let current_pod = current.template.spec.as_ref();
        let desired_pod = desired.template.spec.as_ref();
        let pod_labels = |t: &PodTemplateSpec| t.metadata.as_ref().and_then(|m| m.labels.clone());
        if pod_labels(&current.template) != pod_labels(&desired.template)
            || annotations_diverge(
                current.template.metadata.as_ref(),
                desired.template.metadata.as_ref(),
            )
        {
            return true;
        }
        if current_pod.and_then(|p| p.service_account_name.as_deref())
            != desired_pod.and_then(|p| p.service_account_name.as_deref())
        {
            return true;
        }
        #[allow(clippy::type_complexity)]
        fn scheduling(
            p: Option<&PodSpec>,
        ) -> (Option<&BTreeMap<String, String>>, Option<&[Toleration]>) {
            (
                p.and_then(|p| p.node_selector.as_ref()),
                p.and_then(|p| p.tolerations.as_deref()),
            )
        }
        if scheduling_diverges(scheduling(current_pod), scheduling(desired_pod)) {
            return true;
        }

        container_diverges(
            current_pod.and_then(|p| find_adapter_container(&p.containers)),
            desired_pod.and_then(|p| find_adapter_container(&p.containers)),
        )
    }

    fn apply_desired(&mut self, desired: &Self) {
        if let Some(labels) = &desired.metadata.labels {
            self.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .extend(labels.clone());
        }
        self.metadata.owner_references = desired.metadata.owner_references.clone();
        self.spec = desired.spec.clone();
    }

    fn readiness(&self) -> Readiness {
        let available = self
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Available"));

        match available {
            Some(c) if c.status == "True" => Readiness::Ready,
            Some(c) if c.status == "False" => Readiness::NotReady {
                reason: c.reason.clone().unwrap_or_else(|| "Unavailable".into()),
                message: c.message.clone().unwrap_or_default(),
            },
            _ => Readiness::Unknown {
                reason: "Deploying".into(),
                message: "the adapter Deployment has not reported its availability yet".into(),
            },
        }
    }
}
