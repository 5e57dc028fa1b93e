use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Pod, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::{Api, ListParams, Patch, ResourceExt};
use kube::client::Client;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::events::{Event, EventType, Recorder};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::Resource;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::*;

use super::{Diagnostics, State, FIELD_MANAGER};
use crate::metrics::Metrics;
use crate::reconcilers::adapter::{AdapterReconciler, AdapterWorkload};
use crate::reconcilers::client::{KubeObjectApi, ObjectApi};
use crate::reconcilers::events::{
    enqueue_controller_of, enqueue_objects_in_namespace_of, EventRouter,
};
use crate::reconcilers::ownership::OwnerResolver;
use crate::reconcilers::rbac::RbacReconciler;
use crate::reconcilers::sink::AddressableResolver;
use crate::reconcilers::status::{StatusManager, SINK_RESOLVED};
use crate::reconcilers::{adapter_labels, label_selector_string, managed_by_selector};
use crate::resources::common::{CloudEventAttributes, Component, ComponentStatus, Tenancy};
use crate::telemetry;
use crate::{Error, Result};

/// How often converged components are checked again.
const RESYNC_PERIOD: Duration = Duration::from_secs(300);
/// How often components whose sink could not be resolved are checked again.
const UNRESOLVED_SINK_PERIOD: Duration = Duration::from_secs(60);

pub(super) struct Context<C: Component> {
    /// Kubernetes event recorder
    recorder: Recorder,
    /// Writes the status of components
    api: Arc<dyn ObjectApi<C>>,
    adapter: AdapterReconciler<C>,
    /// Diagnostics read by the web server
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    metrics: Metrics,
}

#[instrument(skip(ctx, component), fields(trace_id, kind = %C::kind(&())))]
async fn reconcile<C: Component>(component: Arc<C>, ctx: Arc<Context<C>>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure::<C>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let namespace = component
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = component.name_any();

    if component.meta().deletion_timestamp.is_some() {
        // children go away with their owner
        debug!("{} {namespace}/{name} is being deleted", C::kind(&()));
        return Ok(Action::await_change());
    }

    info!("Reconciling {} {name} in namespace {namespace}", C::kind(&()));

    let current = component.component_status().cloned().unwrap_or_default();
    let mut status = StatusManager::new(C::CONDITIONS, current.clone());
    let result = ctx.adapter.reconcile(component.as_ref(), &mut status).await;
    let action = requeue_action::<C>(&status);
    let desired = stamp(component.as_ref(), status.into_status());

    // failed passes still record their conditions
    let patched = if desired != current {
        debug!("Patching status of {} {namespace}/{name}", C::kind(&()));
        let patch = Patch::Apply(json!({
            "apiVersion": C::api_version(&()),
            "kind": C::kind(&()),
            "status": desired,
        }));
        ctx.api
            .patch_status(&namespace, &name, &patch)
            .await
            .map(|_| ())
    } else {
        Ok(())
    };

    let err = match (result, patched) {
        (Ok(_), Ok(())) => return Ok(action),
        (Ok(_), Err(err)) => Error::KubeError(err),
        (Err(err), patched) => {
            if let Err(patch_err) = patched {
                warn!("failed to patch status of {namespace}/{name}: {patch_err}");
            }
            err
        }
    };

    warn!("reconcile failed: {:?}", err);
    ctx.recorder
        .publish(
            &Event {
                type_: EventType::Warning,
                reason: "FailedReconcile".into(),
                note: Some(err.to_string()),
                action: "Reconcile".into(),
                secondary: None,
            },
            &component.object_ref(&()),
        )
        .await?;
    ctx.metrics.reconcile_failure(component.as_ref(), &err);
    Err(err)
}

fn error_policy<K, C>(_component: Arc<K>, _: &Error, _ctx: C) -> Action {
    Action::requeue(Duration::from_secs(30))
}

fn requeue_action<C: Component>(status: &StatusManager) -> Action {
    if C::CONDITIONS.contains(SINK_RESOLVED) && !status.is_true(SINK_RESOLVED) {
        Action::requeue(UNRESOLVED_SINK_PERIOD)
    } else {
        Action::requeue(RESYNC_PERIOD)
    }
}

/// Status fields derived from the component itself rather than from the reconciliation.
fn stamp<C: Component>(component: &C, mut status: ComponentStatus) -> ComponentStatus {
    status.observed_generation = component.meta().generation;
    let source = component.event_source().unwrap_or_default();
    status.ce_attributes = component
        .event_types()
        .iter()
        .map(|t| CloudEventAttributes {
            r#type: (*t).into(),
            source: source.clone(),
        })
        .collect();
    status
}

/// Generation-based predicate to filter out status-only changes
fn generation_predicate<K: Resource>(obj: &K) -> Option<u64> {
    obj.meta().generation.map(|g| g as u64)
}

/// Run the controller of the component kind C
pub async fn run<C: Component>(client: Client, metrics: Metrics, state: State) {
    let kind = C::kind(&());
    let components: Api<C> = Api::all(client.clone());

    if let Err(e) = components.list(&ListParams::default().limit(1)).await {
        error!("{kind} is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    // adapters of C and everything below them carry these labels
    let adapter_cfg = Config::default().labels(&label_selector_string(&adapter_labels::<C>()));
    // all RBAC objects we create carry this one
    let managed_cfg = Config::default().labels(&managed_by_selector());

    let (component_store, component_writer) = reflector::store();
    let component_reflector = reflector(component_writer, watcher(components, Config::default()))
        .touched_objects()
        .default_backoff()
        .predicate_filter(generation_predicate);

    let adapters: Api<C::Adapter> = Api::all(client.clone());
    let (adapter_store, adapter_writer) = reflector::store();
    let adapter_reflector = reflector(adapter_writer, watcher(adapters, adapter_cfg.clone()))
        .touched_objects()
        .default_backoff();

    let service_accounts: Api<ServiceAccount> = Api::all(client.clone());
    let (sa_store, sa_writer) = reflector::store();
    let sa_reflector = reflector(sa_writer, watcher(service_accounts, managed_cfg.clone()))
        .touched_objects()
        .default_backoff();

    let role_bindings: Api<RoleBinding> = Api::all(client.clone());
    let (rb_store, rb_writer) = reflector::store();
    let rb_reflector = reflector(rb_writer, watcher(role_bindings, managed_cfg))
        .touched_objects()
        .default_backoff();

    let (pod_store, pod_writer) = reflector::store::<Pod>();
    let (replicaset_store, replicaset_writer) = reflector::store::<ReplicaSet>();
    let (deployment_store, deployment_writer) = reflector::store::<Deployment>();
    let router = EventRouter::<C>::new(OwnerResolver::new(replicaset_store, deployment_store));

    let resync_store = component_store.clone();
    let mut controller = Controller::for_stream(component_reflector, component_store.clone())
        .with_config(controller::Config::default().concurrency(state.concurrency))
        .shutdown_on_signal()
        .watches_stream(
            adapter_reflector,
            move |adapter: C::Adapter| -> Vec<ObjectRef<C>> {
                match C::TENANCY {
                    Tenancy::Exclusive => enqueue_controller_of::<C>(adapter.meta())
                        .into_iter()
                        .collect(),
                    Tenancy::Shared => {
                        enqueue_objects_in_namespace_of(&resync_store, adapter.meta())
                    }
                }
            },
        )
        .watches_stream(sa_reflector, |sa| enqueue_controller_of::<C>(sa.meta()))
        .watches_stream(rb_reflector, |rb| enqueue_controller_of::<C>(rb.meta()));

    if C::Adapter::WATCH_PODS {
        let pods: Api<Pod> = Api::all(client.clone());
        let pod_reflector = reflector(pod_writer, watcher(pods, adapter_cfg.clone()))
            .touched_objects()
            .default_backoff();

        let replicasets: Api<ReplicaSet> = Api::all(client.clone());
        let replicaset_reflector =
            reflector(replicaset_writer, watcher(replicasets, adapter_cfg.clone()))
                .touched_objects()
                .default_backoff();

        let deployments: Api<Deployment> = Api::all(client.clone());
        let deployment_reflector = reflector(deployment_writer, watcher(deployments, adapter_cfg))
            .touched_objects()
            .default_backoff();

        controller = controller
            .watches_stream(pod_reflector, move |pod| router.route(&pod))
            // just so that these get polled; the owner resolver reads them
            .watches_stream(replicaset_reflector, |_| std::iter::empty())
            .watches_stream(deployment_reflector, |_| std::iter::empty());
    }

    let rbac = RbacReconciler::new(
        Arc::new(KubeObjectApi::<ServiceAccount>::new(client.clone(), FIELD_MANAGER)),
        Arc::new(KubeObjectApi::<RoleBinding>::new(client.clone(), FIELD_MANAGER)),
        sa_store,
        rb_store,
        component_store,
    );
    let ctx = Arc::new(Context {
        recorder: Recorder::new(client.clone(), FIELD_MANAGER.into()),
        api: Arc::new(KubeObjectApi::<C>::new(client.clone(), FIELD_MANAGER)),
        adapter: AdapterReconciler::new(
            Arc::new(AddressableResolver::new(client.clone())),
            Arc::new(KubeObjectApi::<C::Adapter>::new(client, FIELD_MANAGER)),
            adapter_store,
            pod_store,
            rbac,
            state.adapter_images.clone(),
        ),
        diagnostics: state.diagnostics.clone(),
        metrics,
    });

    info!("Starting {kind} controller");
    controller
        .run(reconcile::<C>, error_policy, ctx)
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
