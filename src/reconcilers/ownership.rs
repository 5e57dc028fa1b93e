use std::collections::HashSet;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::runtime::reflector::{ObjectRef, Store};
use tracing::*;

use super::controller_of;

/// Longest owner chain we are willing to climb.
pub const MAX_OWNER_DEPTH: usize = 8;

/// Climbs controller references through the cached intermediate controllers we know about
/// (`apps/v1` ReplicaSets and Deployments), eg. Pod -> ReplicaSet -> Deployment -> component.
#[derive(Clone)]
pub struct OwnerResolver {
    replicasets: Store<ReplicaSet>,
    deployments: Store<Deployment>,
}

enum Hop {
    /// The owner is not a kind we know how to climb through; it is the outermost we can tell
    Unsupported,
    Missing,
    Found(ObjectMeta),
}

impl OwnerResolver {
    pub fn new(replicasets: Store<ReplicaSet>, deployments: Store<Deployment>) -> Self {
        Self {
            replicasets,
            deployments,
        }
    }

    /// Returns the outermost controller reference of the object, or None when the object has no
    /// controller or the chain cannot be followed (cache miss, stale reference, cycle, too deep).
    pub fn outermost_controller(&self, meta: &ObjectMeta) -> Option<OwnerReference> {
        let mut reference = controller_of(meta)?.clone();
        let Some(namespace) = meta.namespace.as_deref() else {
            debug!("object {:?} has a controller but no namespace", meta.name);
            return None;
        };

        let mut visited: HashSet<String> = meta.uid.iter().cloned().collect();

        for _ in 0..MAX_OWNER_DEPTH {
            if !visited.insert(reference.uid.clone()) {
                warn!(
                    "owner reference cycle through {} {namespace}/{} ({})",
                    reference.kind, reference.name, reference.uid
                );
                return None;
            }

            let owner = match self.lookup(namespace, &reference) {
                Hop::Unsupported => return Some(reference),
                Hop::Missing => {
                    debug!(
                        "controller {} {namespace}/{} not in cache, dropping event",
                        reference.kind, reference.name
                    );
                    return None;
                }
                Hop::Found(owner) => owner,
            };

            if owner.uid.as_deref() != Some(reference.uid.as_str()) {
                debug!(
                    "stale reference to {} {namespace}/{}, cached uid is {:?}",
                    reference.kind, reference.name, owner.uid
                );
                return None;
            }

            match controller_of(&owner) {
                Some(next) => reference = next.clone(),
                None => return Some(self_reference(&owner, &reference)),
            }
        }

        warn!(
            "owner chain of {:?} in {namespace} is deeper than {MAX_OWNER_DEPTH}",
            meta.name
        );
        None
    }

    fn lookup(&self, namespace: &str, reference: &OwnerReference) -> Hop {
        let group = reference
            .api_version
            .split_once('/')
            .map(|(group, _)| group)
            .unwrap_or_default();
        if group != "apps" {
            return Hop::Unsupported;
        }

        let found = match reference.kind.as_str() {
            "ReplicaSet" => self
                .replicasets
                .get(&ObjectRef::new(&reference.name).within(namespace))
                .map(|rs| rs.metadata.clone()),
            "Deployment" => self
                .deployments
                .get(&ObjectRef::new(&reference.name).within(namespace))
                .map(|d| d.metadata.clone()),
            _ => return Hop::Unsupported,
        };

        match found {
            Some(meta) => Hop::Found(meta),
            None => Hop::Missing,
        }
    }
}

/// The reference an outermost object would have if it were controlled by nothing but itself.
fn self_reference(meta: &ObjectMeta, led_here: &OwnerReference) -> OwnerReference {
    OwnerReference {
        api_version: led_here.api_version.clone(),
        kind: led_here.kind.clone(),
        name: meta.name.clone().unwrap_or_else(|| led_here.name.clone()),
        uid: meta.uid.clone().unwrap_or_else(|| led_here.uid.clone()),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
