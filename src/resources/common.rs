use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, ResourceRequirements, SecretKeySelector, Toleration,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::reconcilers::adapter::AdapterWorkload;
use crate::reconcilers::status::ConditionSet;

/// Whether a component gets an adapter of its own, or shares one adapter with every
/// component of the same kind in its namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tenancy {
    /// One adapter per component, controlled by it and garbage collected with it.
    Exclusive,
    /// One adapter per namespace, matched by labels and owned by no single component.
    Shared,
}

/// The capabilities the generic reconcilers need from a component kind.
///
/// Every integration CRD implements this once; the controller, the adapter reconciler and
/// the RBAC reconciler only ever talk to components through it.
pub trait Component:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The workload kind realizing this component.
    type Adapter: AdapterWorkload;

    const TENANCY: Tenancy;

    /// Conditions which must all be True for the component to be Ready.
    const CONDITIONS: ConditionSet;

    fn component_status(&self) -> Option<&ComponentStatus>;

    /// Where the adapter sends the events it produces, if anywhere.
    ///
    /// The resolved sink only reaches exclusive adapters. A shared adapter serves many
    /// components and carries no per-component inputs: no sink, overrides or kind env.
    fn sink(&self) -> Option<&Destination> {
        None
    }

    fn adapter_overrides(&self) -> Option<&AdapterOverrides> {
        None
    }

    /// Kind specific environment of the adapter container.
    fn adapter_env(&self) -> Vec<EnvVar> {
        Vec::new()
    }

    /// CloudEvent types this component emits.
    fn event_types(&self) -> &'static [&'static str] {
        &[]
    }

    /// CloudEvent source attribute of the events this component emits.
    fn event_source(&self) -> Option<String> {
        None
    }
}

/// Status shared by every component kind.
/// This is set and managed automatically by the controller.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// The generation of the component last processed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions making up the readiness of the component.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ComponentCondition>,

    /// The resolved URI of the component's sink.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink_uri: Option<String>,

    /// Address at which the component accepts events, for request-driven adapters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,

    /// Attributes of the CloudEvents emitted by the component.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ce_attributes: Vec<CloudEventAttributes>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentCondition {
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: Option<Time>,

    /// Human-readable message indicating details about last transition.
    pub message: Option<String>,

    /// Unique, one-word, CamelCase reason for the condition's last transition.
    pub reason: Option<String>,

    /// Status is the status of the condition. Can be True, False, Unknown.
    pub status: String,

    /// Type of the condition, eg. `Ready`, `AdapterReady`.
    pub r#type: String,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct Addressable {
    pub url: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct CloudEventAttributes {
    pub r#type: String,
    pub source: String,
}

/// A destination for events: a reference to an addressable object, a URI, or both (in which
/// case the URI must be relative and is resolved against the address of the object).
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct Destination {
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<KReference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Reference to an object in the cluster. The namespace defaults to the one of the referrer.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Deployment parameters of the adapter which users may override per component.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdapterOverrides {
    /// Container image of the adapter; defaults to the image configured for the kind.
    pub image: Option<String>,
    /// Number of replicas of long-running adapters.
    #[schemars(range(min = 0))]
    pub replicas: Option<i32>,
    /// Whether a request-driven adapter is reachable from outside the cluster.
    pub public: Option<bool>,
    /// Compute resources of the adapter container.
    pub resources: Option<ResourceRequirements>,
    /// Extra environment; takes precedence over the variables set by the controller.
    pub env: Option<Vec<EnvVar>>,
    /// Extra labels of the adapter pods.
    pub labels: Option<BTreeMap<String, String>>,
    /// Extra annotations of the adapter pods.
    pub annotations: Option<BTreeMap<String, String>>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub tolerations: Option<Vec<Toleration>>,
}

/// A value given either literally or through a key of a Secret.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueFromField {
    pub value: Option<String>,
    pub value_from_secret: Option<SecretKeySelector>,
}

impl ValueFromField {
    pub fn to_env_var(&self, name: &str) -> EnvVar {
        EnvVar {
            name: name.into(),
            value: self.value.clone(),
            value_from: self
                .value_from_secret
                .clone()
                .map(|secret_key_ref| EnvVarSource {
                    secret_key_ref: Some(secret_key_ref),
                    ..Default::default()
                }),
        }
    }
}

pub(crate) fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        value_from: None,
    }
}
