use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::resources::common::Addressable;

/// Knative Service manages a request-driven, autoscaled workload
/// API: serving.knative.dev/v1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "serving.knative.dev",
    version = "v1",
    kind = "Service",
    namespaced
)]
#[kube(status = "ServiceStatus")]
pub struct ServiceSpec {
    /// Template for the Revisions of the Service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<RevisionTemplateSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ServiceStatus {
    /// Conditions communicate information about ongoing/complete reconciliation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<KnativeCondition>>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none", rename = "observedGeneration")]
    pub observed_generation: Option<i64>,

    /// URL of the Service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Cluster-internal address of the Service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,

    /// Latest ready revision name
    #[serde(skip_serializing_if = "Option::is_none", rename = "latestReadyRevisionName")]
    pub latest_ready_revision_name: Option<String>,
}

/// Knative conditions frequently omit reason and message, unlike metav1.Condition
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct KnativeCondition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "lastTransitionTime")]
    pub last_transition_time: Option<Time>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct RevisionTemplateSpec {
    /// Metadata for the Revision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,

    /// Spec for the Revision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<RevisionSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct RevisionSpec {
    /// Containers in the Revision
    #[serde(default)]
    pub containers: Vec<Container>,

    /// Service account name
    #[serde(skip_serializing_if = "Option::is_none", rename = "serviceAccountName")]
    pub service_account_name: Option<String>,

    /// Timeout seconds
    #[serde(skip_serializing_if = "Option::is_none", rename = "timeoutSeconds")]
    pub timeout_seconds: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "nodeSelector")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    /// Other fields passed through as-is
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}
