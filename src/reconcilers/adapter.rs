use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{EnvVar, Pod, ResourceRequirements, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::*;
use url::Url;

use super::client::{create_or_get, ObjectApi};
use super::rbac::RbacReconciler;
use super::sink::SinkResolver;
use super::status::{StatusManager, ADAPTER_READY, RBAC_READY, SINK_RESOLVED};
use super::{adapter_labels, adapter_type, child_name, controller_of, instance_labels, labels_match};
use crate::resources::common::{env_var, Addressable, Component, Tenancy};
use crate::{Error, Result};

/// Everything needed to render the adapter workload of a component, independent of its kind.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdapterTemplate {
    pub name: String,
    pub namespace: String,
    /// Labels of the workload object, also used to select its pods.
    pub labels: BTreeMap<String, String>,
    /// Labels of the pods: the workload labels plus user supplied ones.
    pub pod_labels: BTreeMap<String, String>,
    pub pod_annotations: BTreeMap<String, String>,
    pub owner_reference: Option<OwnerReference>,
    pub image: String,
    pub env: Vec<EnvVar>,
    pub replicas: Option<i32>,
    pub resources: Option<ResourceRequirements>,
    pub service_account: String,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub tolerations: Option<Vec<Toleration>>,
    /// Whether a request-driven adapter is exposed outside the cluster.
    pub public: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Readiness {
    Ready,
    /// Still progressing, or no status reported yet
    Unknown { reason: String, message: String },
    NotReady { reason: String, message: String },
}

/// A kind of workload adapters are run as.
pub trait AdapterWorkload:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Whether the pods of this workload are watched and inspected for failures.
    const WATCH_PODS: bool;

    fn from_template(template: &AdapterTemplate) -> Self;

    /// True if the fields we manage differ between this observed object and the desired one.
    fn diverges_from(&self, desired: &Self) -> bool;

    /// Copies the managed fields of desired onto this observed object.
    fn apply_desired(&mut self, desired: &Self);

    fn readiness(&self) -> Readiness;

    /// The URL at which a request-driven adapter accepts events.
    fn url(&self) -> Option<Url> {
        None
    }
}

/// Where default adapter images are pulled from: `<registry>/<kind>-adapter:<tag>`.
#[derive(Clone, Debug)]
pub struct AdapterImages {
    pub registry: String,
    pub tag: String,
}

impl AdapterImages {
    pub fn image_for<C: Component>(&self) -> String {
        format!(
            "{}/{}-adapter:{}",
            self.registry.trim_end_matches('/'),
            adapter_type::<C>(),
            self.tag
        )
    }
}

impl Default for AdapterImages {
    fn default() -> Self {
        Self {
            registry: "ghcr.io/integrations".into(),
            tag: "latest".into(),
        }
    }
}

/// Drives the adapter of a component, and what it depends on, towards the desired state.
pub struct AdapterReconciler<C: Component> {
    sink_resolver: Arc<dyn SinkResolver>,
    api: Arc<dyn ObjectApi<C::Adapter>>,
    adapters: Store<C::Adapter>,
    pods: Store<Pod>,
    rbac: RbacReconciler<C>,
    images: AdapterImages,
}

impl<C: Component> AdapterReconciler<C> {
    pub fn new(
        sink_resolver: Arc<dyn SinkResolver>,
        api: Arc<dyn ObjectApi<C::Adapter>>,
        adapters: Store<C::Adapter>,
        pods: Store<Pod>,
        rbac: RbacReconciler<C>,
        images: AdapterImages,
    ) -> Self {
        Self {
            sink_resolver,
            api,
            adapters,
            pods,
            rbac,
            images,
        }
    }

    /// Runs one pass for the component, recording the outcome on its conditions.
    ///
    /// Returns None when the pass ended early on a permanent misconfiguration, which is only
    /// visible through the conditions.
    pub async fn reconcile(
        &self,
        component: &C,
        status: &mut StatusManager,
    ) -> Result<Option<C::Adapter>> {
        let namespace = component
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

        let sink = match component.sink() {
            None => None,
            Some(destination) => match self.sink_resolver.resolve(destination, &namespace).await {
                Ok(uri) => {
                    status.mark_true(SINK_RESOLVED);
                    status.status_mut().sink_uri = Some(uri.to_string());
                    Some(uri)
                }
                Err(err) if err.is_permanent() => {
                    info!(
                        "Sink of {} {namespace}/{} cannot be resolved: {err}",
                        C::kind(&()),
                        component.name_any()
                    );
                    status.mark_false(SINK_RESOLVED, err.reason(), err.to_string());
                    status.status_mut().sink_uri = None;
                    return Ok(None);
                }
                Err(err) => {
                    status.mark_unknown(SINK_RESOLVED, err.reason(), err.to_string());
                    return Err(Error::SinkResolution(err));
                }
            },
        };

        let (service_account, _) = match self.rbac.reconcile(component).await {
            Ok(pair) => {
                status.mark_true(RBAC_READY);
                pair
            }
            Err(err) => {
                status.mark_false(RBAC_READY, "FailedRBAC", err.to_string());
                return Err(err);
            }
        };

        let template = self.template(
            component,
            &namespace,
            sink.as_ref(),
            service_account.name_any(),
        )?;
        let desired = C::Adapter::from_template(&template);

        let adapter = match self.find_adapter(component, &template) {
            None => {
                info!("Creating {} {namespace}/{}", C::Adapter::kind(&()), template.name);
                create_or_get(self.api.as_ref(), &namespace, &desired)
                    .await
                    .inspect_err(|err| {
                        status.mark_false(ADAPTER_READY, "FailedCreate", err.to_string())
                    })?
            }
            Some(current) if current.diverges_from(&desired) => {
                info!("Updating {} {namespace}/{}", C::Adapter::kind(&()), template.name);
                let mut updated = current.as_ref().clone();
                updated.apply_desired(&desired);
                self.api
                    .update(&namespace, &updated)
                    .await
                    .inspect_err(|err| {
                        status.mark_false(ADAPTER_READY, "FailedUpdate", err.to_string())
                    })?
            }
            Some(current) => {
                debug!("{} {namespace}/{} is up to date", C::Adapter::kind(&()), template.name);
                current.as_ref().clone()
            }
        };

        self.propagate_readiness(component, &template, &adapter, status);

        Ok(Some(adapter))
    }

    fn template(
        &self,
        component: &C,
        namespace: &str,
        sink: Option<&Url>,
        service_account: String,
    ) -> Result<AdapterTemplate> {
        let kind = adapter_type::<C>();
        let component_name = component.name_any();

        let (name, labels, owner_reference, overrides) = match C::TENANCY {
            Tenancy::Exclusive => (
                child_name(&kind, &component_name),
                instance_labels::<C>(&component_name),
                Some(
                    component
                        .controller_owner_ref(&())
                        .ok_or(Error::MissingObjectKey(".metadata.uid"))?,
                ),
                component.adapter_overrides(),
            ),
            // one object serves many components; per-component overrides would fight each other
            Tenancy::Shared => (format!("{kind}-adapter"), adapter_labels::<C>(), None, None),
        };

        let mut defaults = vec![env_var("NAMESPACE", namespace), env_var("COMPONENT", &kind)];
        if C::TENANCY == Tenancy::Exclusive {
            defaults.push(env_var("NAME", &component_name));
            if let Some(sink) = sink {
                defaults.push(env_var("K_SINK", sink.as_str()));
            }
            defaults.extend(component.adapter_env());
        }

        let mut pod_labels = labels.clone();
        let mut pod_annotations = BTreeMap::new();
        if let Some(overrides) = overrides {
            if let Some(extra) = &overrides.labels {
                // never let users break the selector
                pod_labels.extend(
                    extra
                        .iter()
                        .filter(|(k, _)| !labels.contains_key(*k))
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
            }
            if let Some(extra) = &overrides.annotations {
                pod_annotations.extend(extra.clone());
            }
        }

        Ok(AdapterTemplate {
            name,
            namespace: namespace.into(),
            labels,
            pod_labels,
            pod_annotations,
            owner_reference,
            image: overrides
                .and_then(|o| o.image.clone())
                .unwrap_or_else(|| self.images.image_for::<C>()),
            env: merge_env(defaults, overrides.and_then(|o| o.env.as_deref())),
            replicas: overrides.and_then(|o| o.replicas),
            resources: overrides.and_then(|o| o.resources.clone()),
            service_account,
            node_selector: overrides.and_then(|o| o.node_selector.clone()),
            tolerations: overrides.and_then(|o| o.tolerations.clone()),
            public: overrides.and_then(|o| o.public).unwrap_or(false),
        })
    }

    fn find_adapter(&self, component: &C, template: &AdapterTemplate) -> Option<Arc<C::Adapter>> {
        match C::TENANCY {
            Tenancy::Exclusive => {
                let uid = component.meta().uid.as_deref()?;
                self.adapters.state().into_iter().find(|adapter| {
                    adapter.meta().namespace.as_deref() == Some(template.namespace.as_str())
                        && labels_match(&template.labels, adapter.meta().labels.as_ref())
                        && controller_of(adapter.meta()).is_some_and(|r| r.uid == uid)
                })
            }
            Tenancy::Shared => self
                .adapters
                .get(&ObjectRef::new(&template.name).within(&template.namespace))
                .filter(|adapter| labels_match(&template.labels, adapter.meta().labels.as_ref())),
        }
    }

    fn propagate_readiness(
        &self,
        component: &C,
        template: &AdapterTemplate,
        adapter: &C::Adapter,
        status: &mut StatusManager,
    ) {
        match adapter.readiness() {
            Readiness::Ready => status.mark_true(ADAPTER_READY),
            Readiness::Unknown { reason, message } => {
                status.mark_unknown(ADAPTER_READY, &reason, message)
            }
            Readiness::NotReady { reason, message } => {
                let (reason, message) = self
                    .failing_pod(template)
                    .unwrap_or((reason, message));
                status.mark_false(ADAPTER_READY, &reason, message);
            }
        }

        let address = adapter.url().map(|url| match C::TENANCY {
            Tenancy::Exclusive => url,
            Tenancy::Shared => shared_address(&url, template, component),
        });
        status.status_mut().address = address.map(|url| Addressable {
            url: Some(url.to_string()),
        });
    }

    /// Reason and message of the first adapter container that is waiting or terminated.
    fn failing_pod(&self, template: &AdapterTemplate) -> Option<(String, String)> {
        if !C::Adapter::WATCH_PODS {
            return None;
        }
        self.pods
            .state()
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(template.namespace.as_str()))
            .filter(|pod| labels_match(&template.labels, pod.metadata.labels.as_ref()))
            .filter_map(|pod| pod.status.as_ref()?.container_statuses.clone())
            .flatten()
            .find_map(|cs| {
                let state = cs.state?;
                if let Some(waiting) = state.waiting {
                    return Some((
                        waiting.reason.unwrap_or_else(|| "Waiting".into()),
                        waiting.message.unwrap_or_default(),
                    ));
                }
                let terminated = state.terminated?;
                Some((
                    terminated.reason.unwrap_or_else(|| "Terminated".into()),
                    terminated.message.unwrap_or_default(),
                ))
            })
    }
}

/// Components served by a shared adapter are addressed under `<namespace>/<name>`.
fn shared_address<C: Component>(url: &Url, template: &AdapterTemplate, component: &C) -> Url {
    let mut url = url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .push(&template.namespace)
            .push(&component.name_any());
    }
    url
}

/// Our defaults, followed by custom variables; custom variables win over defaults of the same name.
pub fn merge_env(defaults: Vec<EnvVar>, custom: Option<&[EnvVar]>) -> Vec<EnvVar> {
    let custom_names: HashSet<&str> = custom
        .map(|custom| custom.iter().map(|e| e.name.as_ref()).collect())
        .unwrap_or_default();

    let defaults = defaults
        .into_iter()
        .filter(|e| !custom_names.contains(e.name.as_str()));

    if let Some(custom) = custom {
        defaults.chain(custom.iter().cloned()).collect()
    } else {
        defaults.collect()
    }
}
