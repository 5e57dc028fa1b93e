use std::collections::BTreeMap;
use std::hash::Hasher;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;

pub mod adapter;
pub mod client;
pub mod deployment;
pub mod events;
pub mod ksvc;
pub mod ownership;
mod quantity;
pub mod rbac;
pub mod sink;
pub mod status;

pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const APP_INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const APP_COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const APP_PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const APP_MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

pub const MANAGED_BY: &str = "integration-operator";
pub const PART_OF: &str = "integrations";

/// Longest name accepted for the objects we create.
const MAX_NAME_LENGTH: usize = 63;

/// The adapter type of a component kind, its lower-cased kind, eg. `cloudeventssource`.
pub fn adapter_type<C: Resource<DynamicType = ()>>() -> String {
    C::kind(&()).to_lowercase()
}

/// Labels carried by every adapter of the component kind C, exclusive or shared.
pub fn adapter_labels<C: Resource<DynamicType = ()>>() -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_NAME_LABEL.into(), adapter_type::<C>()),
        (APP_COMPONENT_LABEL.into(), "adapter".into()),
        (APP_PART_OF_LABEL.into(), PART_OF.into()),
        (APP_MANAGED_BY_LABEL.into(), MANAGED_BY.into()),
    ])
}

/// Labels of the objects created for a single component.
pub fn instance_labels<C: Resource<DynamicType = ()>>(instance: &str) -> BTreeMap<String, String> {
    let mut labels = adapter_labels::<C>();
    labels.insert(APP_INSTANCE_LABEL.into(), instance.into());
    labels
}

/// Selector matching every object we manage, for watch configs.
pub fn managed_by_selector() -> String {
    format!("{APP_MANAGED_BY_LABEL}={MANAGED_BY}")
}

/// Renders an equality-based label selector,
/// eg. `app.kubernetes.io/name=x,app.kubernetes.io/component=adapter`.
pub fn label_selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// True if every label of the selector is set to the same value in labels.
pub fn labels_match(
    selector: &BTreeMap<String, String>,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(labels) = labels else {
        return selector.is_empty();
    };
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Joins prefix and name; results longer than a DNS label are truncated and suffixed with a
/// hash of the full name so that distinct inputs keep distinct names.
pub fn child_name(prefix: &str, name: &str) -> String {
    let full = format!("{prefix}-{name}");
    if full.len() <= MAX_NAME_LENGTH {
        return full;
    }

    let mut hasher = fnv::FnvHasher::default();
    hasher.write(full.as_bytes());
    let suffix = format!("{:08x}", hasher.finish() as u32);

    let keep = MAX_NAME_LENGTH - suffix.len() - 1;
    let head: String = full.chars().take(keep).collect();
    format!("{}-{suffix}", head.trim_end_matches('-'))
}

pub fn object_meta(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    owner_references: Vec<OwnerReference>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace.into()),
        labels: Some(labels),
        owner_references: if owner_references.is_empty() {
            None
        } else {
            Some(owner_references)
        },
        ..Default::default()
    }
}

/// The reference marked as controller, other owners are ignored.
pub fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_deref()?
        .iter()
        .find(|r| r.controller == Some(true))
}
