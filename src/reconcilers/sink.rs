use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use kube::Client;
use thiserror::Error;
use tracing::*;
use url::Url;

use super::client::ExtKubeApiError;
use crate::controllers::service_url;
use crate::resources::common::{Destination, KReference};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} does not expose an address")]
    NotAddressable {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("invalid destination: {0}")]
    Invalid(String),

    #[error("failed to look up destination: {0}")]
    Kube(#[source] kube::Error),
}

impl ResolveError {
    /// Permanent failures only go away when the destination (or its referent) changes.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, ResolveError::Kube(_))
    }

    /// Condition reason describing the failure.
    pub fn reason(&self) -> &'static str {
        match self {
            ResolveError::NotFound { .. } => "NotFound",
            ResolveError::NotAddressable { .. } => "NotAddressable",
            ResolveError::Invalid(_) => "Invalid",
            ResolveError::Kube(_) => "ResolveFailed",
        }
    }
}

/// Turns an event destination into the URI events are delivered to.
#[async_trait]
pub trait SinkResolver: Send + Sync {
    async fn resolve(&self, destination: &Destination, namespace: &str)
        -> Result<Url, ResolveError>;
}

/// Resolves references through the `status.address.url` of addressable objects.
pub struct AddressableResolver {
    client: Client,
}

impl AddressableResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn address_of(
        &self,
        reference: &KReference,
        namespace: &str,
    ) -> Result<Url, ResolveError> {
        let namespace = reference.namespace.as_deref().unwrap_or(namespace);

        if reference.api_version == "v1" && reference.kind == "Service" {
            return service_url(&reference.name, namespace, None, Some("/"))
                .map_err(|e| ResolveError::Invalid(e.to_string()));
        }

        let (group, version) = reference
            .api_version
            .rsplit_once('/')
            .unwrap_or(("", reference.api_version.as_str()));
        let gvk = GroupVersionKind::gvk(group, version, &reference.kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);

        let not_found = || ResolveError::NotFound {
            kind: reference.kind.clone(),
            namespace: namespace.into(),
            name: reference.name.clone(),
        };

        let obj = match api.get_opt(&reference.name).await {
            Ok(Some(obj)) => obj,
            Ok(None) => return Err(not_found()),
            Err(err) if err.is_not_found() => return Err(not_found()),
            Err(err) => return Err(ResolveError::Kube(err)),
        };

        let address = obj
            .data
            .pointer("/status/address/url")
            .and_then(|url| url.as_str())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ResolveError::NotAddressable {
                kind: reference.kind.clone(),
                namespace: namespace.into(),
                name: reference.name.clone(),
            })?;

        Url::parse(address).map_err(|e| {
            ResolveError::Invalid(format!("address {address} of {}: {e}", reference.name))
        })
    }
}

#[async_trait]
impl SinkResolver for AddressableResolver {
    async fn resolve(
        &self,
        destination: &Destination,
        namespace: &str,
    ) -> Result<Url, ResolveError> {
        let uri = destination.uri.as_deref().filter(|uri| !uri.is_empty());

        let url = match (&destination.reference, uri) {
            (None, None) => {
                return Err(ResolveError::Invalid(
                    "destination has neither a ref nor a uri".into(),
                ))
            }
            (None, Some(uri)) => Url::parse(uri)
                .map_err(|e| ResolveError::Invalid(format!("uri {uri} is not absolute: {e}")))?,
            (Some(reference), None) => self.address_of(reference, namespace).await?,
            (Some(reference), Some(uri)) => {
                if Url::parse(uri).is_ok() {
                    return Err(ResolveError::Invalid(format!(
                        "uri {uri} must be relative when a ref is given"
                    )));
                }
                let base = self.address_of(reference, namespace).await?;
                base.join(uri)
                    .map_err(|e| ResolveError::Invalid(format!("uri {uri}: {e}")))?
            }
        };

        debug!("resolved sink to {url}");
        Ok(url)
    }
}
