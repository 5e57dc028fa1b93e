use std::marker::PhantomData;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::Resource;
use tracing::*;

use super::ownership::OwnerResolver;
use super::{adapter_labels, controller_of, labels_match};
use crate::resources::common::Component;

/// True if the object's controller has the given api version and kind.
pub fn has_controller_of_kind(meta: &ObjectMeta, api_version: &str, kind: &str) -> bool {
    controller_of(meta).is_some_and(|r| refers_to(r, api_version, kind))
}

fn refers_to(reference: &OwnerReference, api_version: &str, kind: &str) -> bool {
    reference.api_version == api_version && reference.kind == kind
}

fn refers_to_component<C: Component>(reference: &OwnerReference) -> bool {
    refers_to(reference, &C::api_version(&()), &C::kind(&()))
}

/// True if the object carries the canonical labels of adapters of the component kind C.
pub fn has_adapter_labels_for<C: Component>(meta: &ObjectMeta) -> bool {
    labels_match(&adapter_labels::<C>(), meta.labels.as_ref())
}

pub fn is_in_namespace(meta: &ObjectMeta, namespace: &str) -> bool {
    meta.namespace.as_deref() == Some(namespace)
}

/// Stand-in for an object several hops below a component: where it lives and who controls it.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlledBy {
    pub namespace: String,
    pub owner: OwnerReference,
}

impl ControlledBy {
    /// The component to reconcile, if the owner is a C.
    pub fn object_ref<C: Component>(&self) -> Option<ObjectRef<C>> {
        if !refers_to_component::<C>(&self.owner) {
            return None;
        }
        Some(ObjectRef::new(&self.owner.name).within(&self.namespace))
    }
}

/// Attributes events of low level objects, like adapter pods, to the component of kind C at
/// the top of their owner chain.
#[derive(Clone)]
pub struct EventRouter<C> {
    resolver: OwnerResolver,
    _component: PhantomData<fn() -> C>,
}

impl<C: Component> EventRouter<C> {
    pub fn new(resolver: OwnerResolver) -> Self {
        Self {
            resolver,
            _component: PhantomData,
        }
    }

    /// Some if the object is labelled as an adapter of C and its outermost controller is a C.
    pub fn ancestor_of_kind(&self, meta: &ObjectMeta) -> Option<ControlledBy> {
        if !has_adapter_labels_for::<C>(meta) {
            return None;
        }
        let owner = self.resolver.outermost_controller(meta)?;
        if !refers_to_component::<C>(&owner) {
            return None;
        }
        Some(ControlledBy {
            namespace: meta.namespace.clone()?,
            owner,
        })
    }

    pub fn route(&self, pod: &Pod) -> Option<ObjectRef<C>> {
        let controlled_by = self.ancestor_of_kind(&pod.metadata)?;
        trace!(
            "pod {:?} routed to {} {}/{}",
            pod.metadata.name,
            controlled_by.owner.kind,
            controlled_by.namespace,
            controlled_by.owner.name
        );
        controlled_by.object_ref::<C>()
    }
}

/// The component of kind C directly controlling the object, if any.
pub fn enqueue_controller_of<C: Component>(meta: &ObjectMeta) -> Option<ObjectRef<C>> {
    if !has_controller_of_kind(meta, &C::api_version(&()), &C::kind(&())) {
        return None;
    }
    let owner = controller_of(meta)?;
    let Some(namespace) = meta.namespace.as_deref() else {
        warn!("dropping event of {:?}: object has no namespace", meta.name);
        return None;
    };
    Some(ObjectRef::new(&owner.name).within(namespace))
}

/// References to every cached object passing the filter.
pub fn global_resync<K, F>(store: &Store<K>, filter: F) -> Vec<ObjectRef<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
    F: Fn(&ObjectMeta) -> bool,
{
    store
        .state()
        .iter()
        .filter(|obj| filter(obj.meta()))
        .map(|obj| ObjectRef::from_obj(obj.as_ref()))
        .collect()
}

/// Every cached object in the namespace of the given (shared adapter) object.
pub fn enqueue_objects_in_namespace_of<K>(store: &Store<K>, meta: &ObjectMeta) -> Vec<ObjectRef<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let Some(namespace) = meta.namespace.as_deref() else {
        warn!("dropping event of {:?}: object has no namespace", meta.name);
        return Vec::new();
    };
    debug!("resyncing {} objects in namespace {namespace}", K::kind(&()));
    global_resync(store, |m| is_in_namespace(m, namespace))
}
