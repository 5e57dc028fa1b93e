use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::*;

/// Mutations against the API server for one namespaced kind.
///
/// Reconcilers read through reflector stores and write exclusively through this trait, so the
/// stores only ever change when the watch streams deliver our writes back.
#[async_trait]
pub trait ObjectApi<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    async fn create(&self, namespace: &str, obj: &K) -> Result<K, kube::Error>;

    async fn update(&self, namespace: &str, obj: &K) -> Result<K, kube::Error>;

    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &Patch<serde_json::Value>,
    ) -> Result<K, kube::Error>;

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Patch<serde_json::Value>,
    ) -> Result<K, kube::Error>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, kube::Error>;
}

/// `ObjectApi` over `kube::Api`
pub struct KubeObjectApi<K> {
    client: Client,
    field_manager: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeObjectApi<K> {
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            _kind: PhantomData,
        }
    }

    fn patch_params(&self, patch: &Patch<serde_json::Value>) -> PatchParams {
        match patch {
            Patch::Apply(_) => PatchParams::apply(&self.field_manager).force(),
            _ => PatchParams {
                field_manager: Some(self.field_manager.clone()),
                ..Default::default()
            },
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(self.field_manager.clone()),
        }
    }
}

#[async_trait]
impl<K> ObjectApi<K> for KubeObjectApi<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn create(&self, namespace: &str, obj: &K) -> Result<K, kube::Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.create(&self.post_params(), obj).await
    }

    async fn update(&self, namespace: &str, obj: &K) -> Result<K, kube::Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&obj.name_any(), &self.post_params(), obj).await
    }

    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &Patch<serde_json::Value>,
    ) -> Result<K, kube::Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &self.patch_params(patch), patch).await
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Patch<serde_json::Value>,
    ) -> Result<K, kube::Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &self.patch_params(patch), patch)
            .await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, kube::Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }
}

/// Classification of API errors the reconcilers react to.
pub trait ExtKubeApiError {
    fn is_not_found(&self) -> bool;

    fn is_conflict(&self) -> bool;

    fn is_already_exists(&self) -> bool;
}

impl ExtKubeApiError for kube::Error {
    fn is_not_found(&self) -> bool {
        matches!(self, kube::Error::Api(e) if e.code == 404 || e.code == 410)
    }

    fn is_conflict(&self) -> bool {
        matches!(self, kube::Error::Api(e) if e.code == 409 && e.reason != "AlreadyExists")
    }

    fn is_already_exists(&self) -> bool {
        matches!(self, kube::Error::Api(e) if e.code == 409 && e.reason == "AlreadyExists")
    }
}

/// Creates obj; if our cache was stale and it exists already, returns the live object instead.
pub async fn create_or_get<K>(
    api: &dyn ObjectApi<K>,
    namespace: &str,
    obj: &K,
) -> Result<K, kube::Error>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    match api.create(namespace, obj).await {
        Err(err) if err.is_already_exists() => {
            let name = obj.meta().name.clone().unwrap_or_default();
            debug!("{} {namespace}/{name} already exists, reading it back", K::kind(&()));
            match api.get(namespace, &name).await? {
                Some(live) => Ok(live),
                // deleted in between, let the next pass create it
                None => Err(err),
            }
        }
        result => result,
    }
}
