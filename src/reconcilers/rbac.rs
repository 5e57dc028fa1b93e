use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};
use tracing::*;

use super::client::{create_or_get, ExtKubeApiError, ObjectApi};
use super::{adapter_labels, adapter_type, child_name, instance_labels, labels_match, object_meta};
use crate::resources::common::{Component, Tenancy};
use crate::{Error, Result};

/// Name of the ServiceAccount, RoleBinding and ClusterRole of the adapters of kind C.
pub fn shared_rbac_name<C: Component>() -> String {
    format!("{}-adapter", adapter_type::<C>())
}

/// Ensures the ServiceAccount and RoleBinding the adapter of a component runs with.
///
/// Exclusive adapters get a pair per component, controlled by it. Shared adapters use one pair
/// per namespace, owned (not controlled) by every component of the kind in that namespace so
/// that it is garbage collected along with the last of them.
pub struct RbacReconciler<C: Component> {
    sa_api: Arc<dyn ObjectApi<ServiceAccount>>,
    rb_api: Arc<dyn ObjectApi<RoleBinding>>,
    sa_store: Store<ServiceAccount>,
    rb_store: Store<RoleBinding>,
    owners: Store<C>,
}

impl<C: Component> RbacReconciler<C> {
    pub fn new(
        sa_api: Arc<dyn ObjectApi<ServiceAccount>>,
        rb_api: Arc<dyn ObjectApi<RoleBinding>>,
        sa_store: Store<ServiceAccount>,
        rb_store: Store<RoleBinding>,
        owners: Store<C>,
    ) -> Self {
        Self {
            sa_api,
            rb_api,
            sa_store,
            rb_store,
            owners,
        }
    }

    pub fn rbac_name(component: &C) -> String {
        match C::TENANCY {
            Tenancy::Exclusive => child_name(&shared_rbac_name::<C>(), &component.name_any()),
            Tenancy::Shared => shared_rbac_name::<C>(),
        }
    }

    pub async fn reconcile(&self, component: &C) -> Result<(ServiceAccount, RoleBinding)> {
        let namespace = component
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let name = Self::rbac_name(component);
        let labels = match C::TENANCY {
            Tenancy::Exclusive => instance_labels::<C>(&component.name_any()),
            Tenancy::Shared => adapter_labels::<C>(),
        };
        let owners = self.owner_references(component, &namespace)?;

        let sa = ServiceAccount {
            metadata: object_meta(&name, &namespace, labels.clone(), owners.clone()),
            ..Default::default()
        };
        let sa = self.reconcile_service_account(&namespace, sa).await?;

        let rb = RoleBinding {
            metadata: object_meta(&name, &namespace, labels, owners),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".into(),
                kind: "ClusterRole".into(),
                name: shared_rbac_name::<C>(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".into(),
                name: name.clone(),
                namespace: Some(namespace.clone()),
                api_group: None,
            }]),
        };
        let rb = self.reconcile_role_binding(&namespace, rb).await?;

        Ok((sa, rb))
    }

    fn owner_references(&self, component: &C, namespace: &str) -> Result<Vec<OwnerReference>> {
        match C::TENANCY {
            Tenancy::Exclusive => Ok(vec![component
                .controller_owner_ref(&())
                .ok_or(Error::MissingObjectKey(".metadata.uid"))?]),
            Tenancy::Shared => {
                let mut owners: BTreeMap<String, OwnerReference> = self
                    .owners
                    .state()
                    .iter()
                    .filter(|c| c.namespace().as_deref() == Some(namespace))
                    .filter(|c| c.meta().deletion_timestamp.is_none())
                    .filter_map(|c| c.owner_ref(&()))
                    .map(|r| (r.uid.clone(), r))
                    .collect();
                // the cache may not have caught up with a component we are reconciling
                let own = component
                    .owner_ref(&())
                    .ok_or(Error::MissingObjectKey(".metadata.uid"))?;
                owners.insert(own.uid.clone(), own);
                Ok(owners.into_values().collect())
            }
        }
    }

    async fn reconcile_service_account(
        &self,
        namespace: &str,
        desired: ServiceAccount,
    ) -> Result<ServiceAccount> {
        let name = desired.name_any();
        let Some(current) = self.sa_store.get(&ObjectRef::new(&name).within(namespace)) else {
            info!("Creating ServiceAccount {namespace}/{name}");
            return Ok(create_or_get(self.sa_api.as_ref(), namespace, &desired).await?);
        };

        if !metadata_diverges(&current.metadata, &desired.metadata) {
            debug!("ServiceAccount {namespace}/{name} is up to date");
            return Ok(current.as_ref().clone());
        }

        info!("Updating ServiceAccount {namespace}/{name}");
        let mut updated = current.as_ref().clone();
        merge_metadata(&mut updated.metadata, &desired.metadata);
        Ok(self.sa_api.update(namespace, &updated).await?)
    }

    async fn reconcile_role_binding(
        &self,
        namespace: &str,
        desired: RoleBinding,
    ) -> Result<RoleBinding> {
        let name = desired.name_any();
        let Some(current) = self.rb_store.get(&ObjectRef::new(&name).within(namespace)) else {
            info!("Creating RoleBinding {namespace}/{name}");
            return Ok(create_or_get(self.rb_api.as_ref(), namespace, &desired).await?);
        };

        if current.role_ref != desired.role_ref {
            // roleRef is immutable
            info!("Recreating RoleBinding {namespace}/{name} with a new roleRef");
            match self.rb_api.delete(namespace, &name).await {
                Err(err) if !err.is_not_found() => return Err(err.into()),
                _ => {}
            }
            return Ok(self.rb_api.create(namespace, &desired).await?);
        }

        if !metadata_diverges(&current.metadata, &desired.metadata)
            && current.subjects == desired.subjects
        {
            debug!("RoleBinding {namespace}/{name} is up to date");
            return Ok(current.as_ref().clone());
        }

        info!("Updating RoleBinding {namespace}/{name}");
        let mut updated = current.as_ref().clone();
        merge_metadata(&mut updated.metadata, &desired.metadata);
        updated.subjects = desired.subjects;
        Ok(self.rb_api.update(namespace, &updated).await?)
    }
}

fn metadata_diverges(
    current: &kube::api::ObjectMeta,
    desired: &kube::api::ObjectMeta,
) -> bool {
    let labels_diverge = desired
        .labels
        .as_ref()
        .is_some_and(|labels| !labels_match(labels, current.labels.as_ref()));
    labels_diverge || current.owner_references != desired.owner_references
}

fn merge_metadata(current: &mut kube::api::ObjectMeta, desired: &kube::api::ObjectMeta) {
    if let Some(labels) = &desired.labels {
        current
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.clone());
    }
    current.owner_references = desired.owner_references.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{
        api_error, store, testsendgridtarget, testsolacesource, FakeApi, MutatingCall,
    };
    use crate::reconcilers::APP_INSTANCE_LABEL;
    use crate::resources::sendgridtargets::SendGridTarget;
    use crate::resources::solacesources::SolaceSource;

    struct Harness<C: Component> {
        sa_api: Arc<FakeApi<ServiceAccount>>,
        rb_api: Arc<FakeApi<RoleBinding>>,
        reconciler: RbacReconciler<C>,
    }

    fn harness<C: Component>(
        sas: Vec<ServiceAccount>,
        rbs: Vec<RoleBinding>,
        owners: Vec<C>,
    ) -> Harness<C> {
        let sa_api = Arc::new(FakeApi::default());
        let rb_api = Arc::new(FakeApi::default());
        let reconciler = RbacReconciler::new(
            sa_api.clone(),
            rb_api.clone(),
            store(sas),
            store(rbs),
            store(owners),
        );
        Harness {
            sa_api,
            rb_api,
            reconciler,
        }
    }

    #[tokio::test]
    async fn exclusive_pair_is_created_and_controlled_by_component() {
        let component = testsolacesource("ns-a", "orders");
        let h = harness::<SolaceSource>(vec![], vec![], vec![component.clone()]);

        let (sa, rb) = h.reconciler.reconcile(&component).await.unwrap();

        assert_eq!(sa.name_any(), "solacesource-adapter-orders");
        assert_eq!(rb.name_any(), "solacesource-adapter-orders");
        let owners = sa.metadata.owner_references.clone().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].controller, Some(true));
        assert_eq!(owners[0].uid, component.metadata.uid.clone().unwrap());
        assert_eq!(sa.labels()[APP_INSTANCE_LABEL], "orders");

        assert_eq!(rb.role_ref.kind, "ClusterRole");
        assert_eq!(rb.role_ref.name, "solacesource-adapter");
        let subject = &rb.subjects.as_ref().unwrap()[0];
        assert_eq!(subject.kind, "ServiceAccount");
        assert_eq!(subject.name, "solacesource-adapter-orders");
        assert_eq!(subject.namespace.as_deref(), Some("ns-a"));

        assert_eq!(
            h.sa_api.mutating_calls(),
            vec![MutatingCall::Create("solacesource-adapter-orders".into())]
        );
        assert_eq!(
            h.rb_api.mutating_calls(),
            vec![MutatingCall::Create("solacesource-adapter-orders".into())]
        );
    }

    #[tokio::test]
    async fn second_pass_with_unchanged_state_does_not_mutate() {
        let component = testsolacesource("ns-a", "orders");
        let first = harness::<SolaceSource>(vec![], vec![], vec![component.clone()]);
        let (sa, rb) = first.reconciler.reconcile(&component).await.unwrap();

        // the watch streams delivered what we created
        let second = harness::<SolaceSource>(vec![sa], vec![rb], vec![component.clone()]);
        second.reconciler.reconcile(&component).await.unwrap();

        assert!(second.sa_api.mutating_calls().is_empty());
        assert!(second.rb_api.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn divergent_labels_and_subjects_are_updated() {
        let component = testsolacesource("ns-a", "orders");
        let first = harness::<SolaceSource>(vec![], vec![], vec![component.clone()]);
        let (mut sa, mut rb) = first.reconciler.reconcile(&component).await.unwrap();

        sa.metadata.labels = None;
        rb.subjects = Some(vec![]);
        let second = harness::<SolaceSource>(vec![sa], vec![rb], vec![component.clone()]);
        let (sa, rb) = second.reconciler.reconcile(&component).await.unwrap();

        assert_eq!(
            second.sa_api.mutating_calls(),
            vec![MutatingCall::Update("solacesource-adapter-orders".into())]
        );
        assert_eq!(
            second.rb_api.mutating_calls(),
            vec![MutatingCall::Update("solacesource-adapter-orders".into())]
        );
        assert_eq!(sa.labels()[APP_INSTANCE_LABEL], "orders");
        assert_eq!(rb.subjects.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn changed_role_ref_recreates_binding() {
        let component = testsolacesource("ns-a", "orders");
        let first = harness::<SolaceSource>(vec![], vec![], vec![component.clone()]);
        let (sa, mut rb) = first.reconciler.reconcile(&component).await.unwrap();

        rb.role_ref.name = "something-else".into();
        let second = harness::<SolaceSource>(vec![sa], vec![rb], vec![component.clone()]);
        let (_, rb) = second.reconciler.reconcile(&component).await.unwrap();

        assert_eq!(
            second.rb_api.mutating_calls(),
            vec![
                MutatingCall::Delete("solacesource-adapter-orders".into()),
                MutatingCall::Create("solacesource-adapter-orders".into()),
            ]
        );
        assert_eq!(rb.role_ref.name, "solacesource-adapter");
    }

    #[tokio::test]
    async fn conflicts_are_returned_unmodified() {
        let component = testsolacesource("ns-a", "orders");
        let first = harness::<SolaceSource>(vec![], vec![], vec![component.clone()]);
        let (mut sa, rb) = first.reconciler.reconcile(&component).await.unwrap();

        sa.metadata.labels = None;
        let second = harness::<SolaceSource>(vec![sa], vec![rb], vec![component.clone()]);
        second.sa_api.fail_next_with(api_error(409, "Conflict"));

        let err = second.reconciler.reconcile(&component).await.unwrap_err();
        match err {
            Error::KubeError(e) => assert!(e.is_conflict()),
            other => panic!("unexpected error {other:?}"),
        }
        // the binding is not touched once the service account failed
        assert!(second.rb_api.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn shared_pair_is_owned_by_every_component_in_namespace() {
        let first = testsendgridtarget("ns-a", "first");
        let second = testsendgridtarget("ns-a", "second");
        let elsewhere = testsendgridtarget("ns-b", "third");
        let h = harness::<SendGridTarget>(
            vec![],
            vec![],
            vec![first.clone(), second.clone(), elsewhere],
        );

        let (sa, rb) = h.reconciler.reconcile(&first).await.unwrap();

        assert_eq!(sa.name_any(), "sendgridtarget-adapter");
        assert!(!sa.labels().contains_key(APP_INSTANCE_LABEL));
        let owners = sa.metadata.owner_references.clone().unwrap();
        let mut uids: Vec<_> = owners.iter().map(|o| o.uid.clone()).collect();
        uids.sort();
        let mut expected = vec![
            first.metadata.uid.clone().unwrap(),
            second.metadata.uid.clone().unwrap(),
        ];
        expected.sort();
        assert_eq!(uids, expected);
        assert!(owners.iter().all(|o| o.controller.is_none()));
        assert_eq!(rb.metadata.owner_references, sa.metadata.owner_references);
    }

    #[tokio::test]
    async fn stale_cache_tolerates_already_exists() {
        let component = testsolacesource("ns-a", "orders");
        let h = harness::<SolaceSource>(vec![], vec![], vec![component.clone()]);
        let existing = ServiceAccount {
            metadata: object_meta(
                "solacesource-adapter-orders",
                "ns-a",
                instance_labels::<SolaceSource>("orders"),
                vec![component.controller_owner_ref(&()).unwrap()],
            ),
            ..Default::default()
        };
        h.sa_api.insert("ns-a", existing);

        let (sa, _) = h.reconciler.reconcile(&component).await.unwrap();
        assert_eq!(sa.name_any(), "solacesource-adapter-orders");
        assert_eq!(
            h.sa_api.mutating_calls(),
            vec![MutatingCall::Create("solacesource-adapter-orders".into())]
        );
    }
}
