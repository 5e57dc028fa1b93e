use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Toleration;
use url::Url;

use super::adapter::{AdapterTemplate, AdapterWorkload, Readiness};
use super::deployment::{
    annotations_diverge, container_diverges, find_adapter_container, metadata, pod_spec,
    scheduling_diverges,
};
use super::labels_match;
use crate::resources::knative::{RevisionSpec, RevisionTemplateSpec, Service, ServiceSpec};

pub const VISIBILITY_LABEL: &str = "networking.knative.dev/visibility";
pub const MIN_SCALE_ANNOTATION: &str = "autoscaling.knative.dev/min-scale";

impl AdapterWorkload for Service {
    const WATCH_PODS: bool = false;

    fn from_template(template: &AdapterTemplate) -> Self {
        let mut labels = template.labels.clone();
        if !template.public {
            labels.insert(VISIBILITY_LABEL.into(), "cluster-local".into());
        }

        let mut annotations = template.pod_annotations.clone();
        if let Some(replicas) = template.replicas {
            annotations.insert(MIN_SCALE_ANNOTATION.into(), replicas.to_string());
        }

        let pod = pod_spec(template);
        Service {
            metadata: metadata(template, labels),
            spec: ServiceSpec {
                template: Some(RevisionTemplateSpec {
                    metadata: Some(kube::api::ObjectMeta {
                        labels: Some(template.pod_labels.clone()),
                        annotations: if annotations.is_empty() {
                            None
                        } else {
                            Some(annotations)
                        },
                        ..Default::default()
                    }),
                    spec: Some(RevisionSpec {
                        containers: pod.containers,
                        service_account_name: pod.service_account_name,
                        node_selector: pod.node_selector,
                        tolerations: pod.tolerations,
                        ..Default::default()
                    }),
                }),
            },
            status: None,
        }
    }

    fn diverges_from(&self, desired: &Self) -> bool {
        let labels_diverge = desired
            .metadata
            .labels
            .as_ref()
            .is_some_and(|labels| !labels_match(labels, self.metadata.labels.as_ref()));
        let visibility = |s: &Service| {
            s.metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(VISIBILITY_LABEL).cloned())
        };
        if labels_diverge
            || visibility(self) != visibility(desired)
            || self.metadata.owner_references != desired.metadata.owner_references
        {
            return true;
        }

        let current = self.spec.template.as_ref();
        let desired = desired.spec.template.as_ref();

        let template_meta = |t: Option<&RevisionTemplateSpec>| {
            let meta = t.and_then(|t| t.metadata.as_ref());
            (
                meta.and_then(|m| m.labels.clone()).unwrap_or_default(),
                meta.and_then(|m| m.annotations.as_ref())
                    .and_then(|a| a.get(MIN_SCALE_ANNOTATION).cloned()),
            )
        };
        let (current_labels, current_scale) = template_meta(current);
        let (desired_labels, desired_scale) = template_meta(desired);
        if !labels_match(&desired_labels, Some(&current_labels))
            || current_scale != desired_scale
            || annotations_diverge(
                current.and_then(|t| t.metadata.as_ref()),
                desired.and_then(|t| t.metadata.as_ref()),
            )
        {
            return true;
        }

        let current = current.and_then(|t| t.spec.as_ref());
        let desired = desired.and_then(|t| t.spec.as_ref());
        if current.and_then(|s| s.service_account_name.as_deref())
            != desired.and_then(|s| s.service_account_name.as_deref())
        {
            return true;
        }
        #[allow(clippy::type_complexity)]
        fn scheduling(
            s: Option<&RevisionSpec>,
        ) -> (Option<&BTreeMap<String, String>>, Option<&[Toleration]>) {
            (
                s.and_then(|s| s.node_selector.as_ref()),
                s.and_then(|s| s.tolerations.as_deref()),
            )
        }
        if scheduling_diverges(scheduling(current), scheduling(desired)) {
            return true;
        }

        container_diverges(
            current.and_then(|s| find_adapter_container(&s.containers)),
            desired.and_then(|s| find_adapter_container(&s.containers)),
        )
    }

    fn apply_desired(&mut self, desired: &Self) {
        let labels = self.metadata.labels.get_or_insert_with(BTreeMap::new);
        if let Some(desired_labels) = &desired.metadata.labels {
            labels.extend(desired_labels.clone());
        }
        if !desired_labels_contain(desired, VISIBILITY_LABEL) {
            labels.remove(VISIBILITY_LABEL);
        }
        self.metadata.owner_references = desired.metadata.owner_references.clone();
        self.spec.template = desired.spec.template.clone();
    }

    fn readiness(&self) -> Readiness {
        let ready = self
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"));

        match ready {
            Some(c) if c.status == "True" => Readiness::Ready,
            Some(c) if c.status == "False" => Readiness::NotReady {
                reason: c.reason.clone().unwrap_or_else(|| "NotReady".into()),
                message: c.message.clone().unwrap_or_default(),
            },
            Some(c) => Readiness::Unknown {
                reason: c.reason.clone().unwrap_or_else(|| "Deploying".into()),
                message: c.message.clone().unwrap_or_default(),
            },
            None => Readiness::Unknown {
                reason: "Deploying".into(),
                message: "the adapter Service has not reported its readiness yet".into(),
            },
        }
    }

    fn url(&self) -> Option<Url> {
        let status = self.status.as_ref()?;
        let url = status
            .url
            .as_deref()
            .or_else(|| status.address.as_ref()?.url.as_deref())?;
        Url::parse(url).ok()
    }
}

fn desired_labels_contain(service: &Service, key: &str) -> bool {
    service
        .metadata
        .labels
        .as_ref()
        .is_some_and(|l| l.contains_key(key))
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    use super::*;
    use crate::fixtures::{overridden_templates, ready_service, template};
    use crate::resources::knative::{KnativeCondition, ServiceStatus};

    #[test]
    fn renders_cluster_local_service() {
        let mut t = template();
        t.replicas = Some(1);
        let service = Service::from_template(&t);

        assert_json_include!(
            actual: serde_json::to_value(&service).unwrap(),
            expected: json!({
                "apiVersion": "serving.knative.dev/v1",
                "kind": "Service",
                "metadata": {
                    "name": "solacesource-orders",
                    "labels": {"networking.knative.dev/visibility": "cluster-local"},
                },
                "spec": {"template": {
                    "metadata": {"annotations": {"autoscaling.knative.dev/min-scale": "1"}},
                    "spec": {
                        "serviceAccountName": "solacesource-adapter-orders",
                        "containers": [{"name": "adapter", "image": "registry.example.com/solacesource-adapter:v1"}],
                    },
                }},
            })
        );
    }

    #[test]
    fn public_service_has_no_visibility_label() {
        let mut t = template();
        t.public = true;
        let service = Service::from_template(&t);
        assert!(!desired_labels_contain(&service, VISIBILITY_LABEL));

        // switching visibility is a divergence that apply_desired resolves
        let mut observed = Service::from_template(&template());
        assert!(observed.diverges_from(&service));
        observed.apply_desired(&service);
        assert!(!observed.diverges_from(&service));
    }

    #[test]
    fn unchanged_service_does_not_diverge() {
        let desired = Service::from_template(&template());
        let observed = ready_service(
            desired.clone(),
            "http://solacesource-orders.ns-a.svc.cluster.local",
        );
        assert!(!observed.diverges_from(&desired));
    }

    #[test]
    fn override_changes_diverge_and_converge() {
        for (field, t) in overridden_templates() {
            let desired = Service::from_template(&t);
            let mut observed = Service::from_template(&template());
            assert!(observed.diverges_from(&desired), "{field} change not detected");

            observed.apply_desired(&desired);
            assert!(!observed.diverges_from(&desired), "{field} still diverges");
        }
    }

    #[test]
    fn min_scale_change_diverges() {
        let mut t = template();
        t.replicas = Some(1);
        let observed = Service::from_template(&t);
        t.replicas = Some(2);
        assert!(observed.diverges_from(&Service::from_template(&t)));
    }

    #[test]
    fn readiness_and_url_come_from_status() {
        let mut service = Service::from_template(&template());
        assert!(matches!(service.readiness(), Readiness::Unknown { .. }));
        assert_eq!(service.url(), None);

        service.status = Some(ServiceStatus {
            conditions: Some(vec![KnativeCondition {
                type_: "Ready".into(),
                status: "False".into(),
                reason: Some("RevisionFailed".into()),
                message: Some("image pull failed".into()),
                last_transition_time: None,
            }]),
            ..Default::default()
        });
        assert_eq!(
            service.readiness(),
            Readiness::NotReady {
                reason: "RevisionFailed".into(),
                message: "image pull failed".into()
            }
        );

        let service = ready_service(service, "https://solacesource-orders.ns-a.example.com");
        assert_eq!(service.readiness(), Readiness::Ready);
        assert_eq!(
            service.url().unwrap().as_str(),
            "https://solacesource-orders.ns-a.example.com/"
        );
    }
}
