use k8s_openapi::api::core::v1::EnvVar;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Component, ComponentStatus, Tenancy, ValueFromField};
use super::knative::Service;
use crate::reconcilers::status::{ConditionSet, TARGET_CONDITIONS};

pub const EVENT_TYPE_SENDGRID_EMAIL_SEND: &str = "io.integrations.sendgrid.email.send";

/// SendGridTarget sends emails through the SendGrid API for each event it receives.
///
/// All SendGridTargets of a namespace are served by a single adapter, addressed per target at
/// `<adapter url>/<namespace>/<name>`. Per-target settings are read by the adapter from the
/// object itself, so adapter overrides are not supported.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "SendGridTarget",
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
pub struct SendGridTargetSpec {
    /// SendGrid API key.
    pub api_key: ValueFromField,

    /// Sender used when the event does not set one.
    pub default_from_email: Option<String>,

    pub default_from_name: Option<String>,

    /// Recipient used when the event does not set one.
    pub default_to_email: Option<String>,

    pub default_to_name: Option<String>,

    /// Subject used when the event does not set one.
    pub default_subject: Option<String>,

    /// Message body used when the event carries no data.
    pub default_message: Option<String>,
}

impl Component for SendGridTarget {
    type Adapter = Service;

    const TENANCY: Tenancy = Tenancy::Shared;
    const CONDITIONS: ConditionSet = TARGET_CONDITIONS;

    fn component_status(&self) -> Option<&ComponentStatus> {
        self.status.as_ref()
    }

    // per-target configuration is not rendered into the shared adapter
    fn adapter_env(&self) -> Vec<EnvVar> {
        Vec::new()
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[EVENT_TYPE_SENDGRID_EMAIL_SEND]
    }
}
