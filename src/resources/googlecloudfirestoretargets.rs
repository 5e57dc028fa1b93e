use k8s_openapi::api::core::v1::EnvVar;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{
    env_var, AdapterOverrides, Component, ComponentStatus, Tenancy, ValueFromField,
};
use super::knative::Service;
use crate::reconcilers::adapter_type;
use crate::reconcilers::status::{ConditionSet, TARGET_CONDITIONS};

pub const EVENT_TYPE_FIRESTORE_WRITE: &str = "io.integrations.google.firestore.write";
pub const EVENT_TYPE_FIRESTORE_WRITE_RESPONSE: &str =
    "io.integrations.google.firestore.write.response";
pub const EVENT_TYPE_FIRESTORE_QUERY_TABLES: &str = "io.integrations.google.firestore.query.tables";
pub const EVENT_TYPE_FIRESTORE_QUERY_TABLES_RESPONSE: &str =
    "io.integrations.google.firestore.query.tables.response";
pub const EVENT_TYPE_FIRESTORE_QUERY_TABLE: &str = "io.integrations.google.firestore.query.table";
pub const EVENT_TYPE_FIRESTORE_QUERY_TABLE_RESPONSE: &str =
    "io.integrations.google.firestore.query.table.response";

/// Event types the target acts upon.
pub const ACCEPTED_EVENT_TYPES: &[&str] = &[
    EVENT_TYPE_FIRESTORE_WRITE,
    EVENT_TYPE_FIRESTORE_QUERY_TABLES,
    EVENT_TYPE_FIRESTORE_QUERY_TABLE,
];

/// GoogleCloudFirestoreTarget writes events to, and queries, Google Cloud Firestore collections.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "GoogleCloudFirestoreTarget",
    group = "targets.integrations.dev",
    version = "v1alpha1",
    namespaced,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#,
    printcolumn = r#"{"name":"URL", "type":"string", "jsonPath":".status.address.url"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "ComponentStatus", category = "integrations")]
#[serde(rename_all = "camelCase")]
pub struct GoogleCloudFirestoreTargetSpec {
    /// Service account key in JSON format.
    pub credentials_json: ValueFromField,

    /// Collection written to when an event does not name one.
    pub default_collection: String,

    /// Google Cloud project hosting the database.
    #[serde(rename = "projectID")]
    pub project_id: String,

    /// Write the payload only, without the CloudEvent context.
    pub discard_cloud_event_context: Option<bool>,

    /// Deployment parameters of the adapter.
    pub adapter_overrides: Option<AdapterOverrides>,
}

impl Component for GoogleCloudFirestoreTarget {
    type Adapter = Service;

    const TENANCY: Tenancy = Tenancy::Exclusive;
    const CONDITIONS: ConditionSet = TARGET_CONDITIONS;

    fn component_status(&self) -> Option<&ComponentStatus> {
        self.status.as_ref()
    }

    fn adapter_overrides(&self) -> Option<&AdapterOverrides> {
        self.spec.adapter_overrides.as_ref()
    }

    fn adapter_env(&self) -> Vec<EnvVar> {
        vec![
            self.spec
                .credentials_json
                .to_env_var("GOOGLE_CREDENTIALS_JSON"),
            env_var("FIRESTORE_DEFAULT_COLLECTION", &self.spec.default_collection),
            env_var("FIRESTORE_PROJECT_ID", &self.spec.project_id),
            env_var(
                "FIRESTORE_DISCARD_CE_CONTEXT",
                self.spec
                    .discard_cloud_event_context
                    .unwrap_or(false)
                    .to_string(),
            ),
            env_var("EVENT_SOURCE", self.event_source().unwrap_or_default()),
        ]
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[
            EVENT_TYPE_FIRESTORE_WRITE_RESPONSE,
            EVENT_TYPE_FIRESTORE_WRITE,
            EVENT_TYPE_FIRESTORE_QUERY_TABLES_RESPONSE,
            EVENT_TYPE_FIRESTORE_QUERY_TABLES,
            EVENT_TYPE_FIRESTORE_QUERY_TABLE_RESPONSE,
            EVENT_TYPE_FIRESTORE_QUERY_TABLE,
        ]
    }

    fn event_source(&self) -> Option<String> {
        Some(format!(
            "io.integrations.{}.{}.{}",
            adapter_type::<Self>(),
            self.namespace().unwrap_or_default(),
            self.name_any()
        ))
    }
}

impl GoogleCloudFirestoreTarget {
    pub fn accepted_event_types(&self) -> &'static [&'static str] {
        ACCEPTED_EVENT_TYPES
    }
}
