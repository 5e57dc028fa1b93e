use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::EnvVar;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{
    env_var, AdapterOverrides, Component, ComponentStatus, Destination, Tenancy, ValueFromField,
};
use crate::reconcilers::status::{ConditionSet, SOURCE_CONDITIONS};

pub const EVENT_TYPE_SOLACE_MESSAGE: &str = "io.integrations.solace.message";

/// SolaceSource consumes messages from a Solace PubSub+ queue and sends them to a sink as
/// CloudEvents.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "SolaceSource",
    group = "sources.integrations.dev",
    version = "v1alpha1",
    namespaced,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#,
    printcolumn = r#"{"name":"Sink", "type":"string", "jsonPath":".status.sinkUri"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "ComponentStatus", category = "integrations")]
#[serde(rename_all = "camelCase")]
pub struct SolaceSourceSpec {
    /// Where to send the events.
    pub sink: Destination,

    /// URL of the broker, eg. `amqp://solace.example.com:5672`.
    pub url: String,

    /// Queue to consume messages from.
    pub queue_name: String,

    /// Message VPN the queue belongs to.
    pub vpn: Option<String>,

    pub username: Option<ValueFromField>,

    pub password: Option<ValueFromField>,

    /// Deployment parameters of the adapter.
    pub adapter_overrides: Option<AdapterOverrides>,
}

impl Component for SolaceSource {
    type Adapter = Deployment;

    const TENANCY: Tenancy = Tenancy::Exclusive;
    const CONDITIONS: ConditionSet = SOURCE_CONDITIONS;

    fn component_status(&self) -> Option<&ComponentStatus> {
        self.status.as_ref()
    }

    fn sink(&self) -> Option<&Destination> {
        Some(&self.spec.sink)
    }

    fn adapter_overrides(&self) -> Option<&AdapterOverrides> {
        self.spec.adapter_overrides.as_ref()
    }

    fn adapter_env(&self) -> Vec<EnvVar> {
        let mut env = vec![
            env_var("SOLACE_URL", &self.spec.url),
            env_var("SOLACE_QUEUE_NAME", &self.spec.queue_name),
        ];
        if let Some(vpn) = &self.spec.vpn {
            env.push(env_var("SOLACE_VPN", vpn));
        }
        if let Some(username) = &self.spec.username {
            env.push(username.to_env_var("SOLACE_USERNAME"));
        }
        if let Some(password) = &self.spec.password {
            env.push(password.to_env_var("SOLACE_PASSWORD"));
        }
        env
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[EVENT_TYPE_SOLACE_MESSAGE]
    }

    fn event_source(&self) -> Option<String> {
        Some(format!(
            "{}/{}",
            self.spec.url.trim_end_matches('/'),
            self.spec.queue_name
        ))
    }
}
