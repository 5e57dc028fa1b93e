use k8s_openapi::api::core::v1::EnvVar;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{
    env_var, AdapterOverrides, Component, ComponentStatus, Destination, Tenancy, ValueFromField,
};
use super::knative::Service;
use crate::reconcilers::status::{ConditionSet, SOURCE_CONDITIONS};

/// CloudEventsSource accepts CloudEvents over HTTP and forwards them to a sink.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "CloudEventsSource",
    group = "sources.integrations.dev",
    version = "v1alpha1",
    namespaced,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#,
    printcolumn = r#"{"name":"URL", "type":"string", "jsonPath":".status.address.url"}"#,
    printcolumn = r#"{"name":"Sink", "type":"string", "jsonPath":".status.sinkUri"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "ComponentStatus", category = "integrations")]
#[serde(rename_all = "camelCase")]
pub struct CloudEventsSourceSpec {
    /// Where to send the received events.
    pub sink: Destination,

    /// HTTP path the adapter accepts events on. Defaults to `/`.
    pub path: Option<String>,

    /// Credentials clients must present through HTTP basic authentication.
    pub credentials: Option<CloudEventsSourceCredentials>,

    /// Limits the rate at which events are accepted.
    pub rate_limiter: Option<RateLimiter>,

    /// Deployment parameters of the adapter.
    pub adapter_overrides: Option<AdapterOverrides>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudEventsSourceCredentials {
    #[serde(default)]
    pub basic_auths: Vec<BasicAuth>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuth {
    pub username: String,
    pub password: ValueFromField,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiter {
    #[schemars(range(min = 1))]
    pub requests_per_second: i32,
}

impl Component for CloudEventsSource {
    type Adapter = Service;

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
        let mut env = vec![env_var(
            "CLOUDEVENTS_PATH",
            self.spec.path.as_deref().unwrap_or("/"),
        )];

        if let Some(credentials) = &self.spec.credentials {
            for (i, auth) in credentials.basic_auths.iter().enumerate() {
                env.push(env_var(
                    &format!("CLOUDEVENTS_BASICAUTH_{i}_USERNAME"),
                    &auth.username,
                ));
                env.push(
                    auth.password
                        .to_env_var(&format!("CLOUDEVENTS_BASICAUTH_{i}_PASSWORD")),
                );
            }
        }

        if let Some(limiter) = &self.spec.rate_limiter {
            env.push(env_var(
                "CLOUDEVENTS_RATELIMITER_RPS",
                limiter.requests_per_second.to_string(),
            ));
        }

        env
    }
}
