//! Helper methods only available for tests
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use http::{Request, Response};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus, ReplicaSet};
use k8s_openapi::api::core::v1::{ResourceRequirements, Toleration};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::Patch;
use kube::client::Body;
use kube::core::ErrorResponse;
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tower_test::mock::{self, Handle};
use url::Url;

use crate::reconcilers::adapter::AdapterTemplate;
use crate::reconcilers::client::ObjectApi;
use crate::reconcilers::instance_labels;
use crate::reconcilers::sink::{ResolveError, SinkResolver};
use crate::resources::common::{Destination, KReference, ValueFromField};
use crate::resources::googlecloudfirestoretargets::{
    GoogleCloudFirestoreTarget, GoogleCloudFirestoreTargetSpec,
};
use crate::resources::knative::{KnativeCondition, Service, ServiceStatus};
use crate::resources::sendgridtargets::{SendGridTarget, SendGridTargetSpec};
use crate::resources::solacesources::{SolaceSource, SolaceSourceSpec};

pub type ApiServerHandle = Handle<Request<Body>, Response<Body>>;

/// A client whose requests are answered through the returned handle.
pub fn mock_client() -> (Client, ApiServerHandle) {
    let (mock_service, handle) = mock::pair::<Request<Body>, Response<Body>>();
    (Client::new(mock_service, "default"), handle)
}

/// The Status object the API server answers a GET of a missing object with.
pub fn not_found_body(resource: &str, name: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": format!("{resource} \"{name}\" not found"),
        "reason": "NotFound",
        "details": {"name": name, "kind": resource},
        "code": 404
    }))
    .unwrap()
}

pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: format!("fake {reason}"),
        reason: reason.into(),
        code,
    })
}

/// A reflector store holding exactly the given objects.
pub fn store<K>(objects: Vec<K>) -> Store<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let (reader, mut writer) = reflector::store();
    for obj in objects {
        writer.apply_watcher_event(&watcher::Event::Apply(obj));
    }
    reader
}

pub fn replicaset_store(replicasets: Vec<ReplicaSet>) -> Store<ReplicaSet> {
    store(replicasets)
}

pub fn deployment_store(deployments: Vec<Deployment>) -> Store<Deployment> {
    store(deployments)
}

pub fn controller_ref(api_version: &str, kind: &str, name: &str, uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.into(),
        kind: kind.into(),
        name: name.into(),
        uid: uid.into(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn meta(
    namespace: &str,
    name: &str,
    uid: &str,
    controller: Option<OwnerReference>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace.into()),
        uid: Some(uid.into()),
        owner_references: controller.map(|c| vec![c]),
        ..Default::default()
    }
}

pub fn testreplicaset(namespace: &str, name: &str, uid: &str, owner: OwnerReference) -> ReplicaSet {
    ReplicaSet {
        metadata: meta(namespace, name, uid, Some(owner)),
        ..Default::default()
    }
}

pub fn testdeployment(
    namespace: &str,
    name: &str,
    uid: &str,
    owner: Option<OwnerReference>,
) -> Deployment {
    Deployment {
        metadata: meta(namespace, name, uid, owner),
        ..Default::default()
    }
}

fn component_meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace.into()),
        uid: Some(format!("uid-{namespace}-{name}")),
        generation: Some(1),
        ..Default::default()
    }
}

pub fn testsolacesource(namespace: &str, name: &str) -> SolaceSource {
    let mut source = SolaceSource::new(
        name,
        SolaceSourceSpec {
            sink: Destination {
                reference: Some(KReference {
                    api_version: "eventing.knative.dev/v1".into(),
                    kind: "Broker".into(),
                    name: "default".into(),
                    namespace: None,
                }),
                uri: None,
            },
            url: "amqp://solace.example.com:5672".into(),
            queue_name: name.into(),
            vpn: None,
            username: None,
            password: None,
            adapter_overrides: None,
        },
    );
    source.metadata = component_meta(namespace, name);
    source
}

pub fn testsendgridtarget(namespace: &str, name: &str) -> SendGridTarget {
    let mut target = SendGridTarget::new(
        name,
        SendGridTargetSpec {
            api_key: ValueFromField {
                value: Some("SG.fake".into()),
                value_from_secret: None,
            },
            default_from_email: Some("noreply@example.com".into()),
            default_from_name: None,
            default_to_email: None,
            default_to_name: None,
            default_subject: None,
            default_message: None,
        },
    );
    target.metadata = component_meta(namespace, name);
    target
}

pub fn testfirestoretarget(namespace: &str, name: &str) -> GoogleCloudFirestoreTarget {
    let mut target = GoogleCloudFirestoreTarget::new(
        name,
        GoogleCloudFirestoreTargetSpec {
            credentials_json: ValueFromField {
                value: Some("{}".into()),
                value_from_secret: None,
            },
            default_collection: "events".into(),
            project_id: "fake-project".into(),
            discard_cloud_event_context: None,
            adapter_overrides: None,
        },
    );
    target.metadata = component_meta(namespace, name);
    target
}

/// The template of an exclusive SolaceSource adapter, without owner.
pub fn template() -> AdapterTemplate {
    let labels = instance_labels::<SolaceSource>("orders");
    AdapterTemplate {
        name: "solacesource-orders".into(),
        namespace: "ns-a".into(),
        labels: labels.clone(),
        pod_labels: labels,
        pod_annotations: BTreeMap::new(),
        owner_reference: None,
        image: "registry.example.com/solacesource-adapter:v1".into(),
        env: vec![crate::resources::common::env_var("NAMESPACE", "ns-a")],
        replicas: None,
        resources: None,
        service_account: "solacesource-adapter-orders".into(),
        node_selector: None,
        tolerations: None,
        public: false,
    }
}

pub fn cpu_limit(cpu: &str) -> ResourceRequirements {
    ResourceRequirements {
        limits: Some(BTreeMap::from([("cpu".into(), Quantity(cpu.into()))])),
        ..Default::default()
    }
}

/// The template with one adapter override changed at a time, named after the changed field.
pub fn overridden_templates() -> Vec<(&'static str, AdapterTemplate)> {
    let mut resources = template();
    resources.resources = Some(cpu_limit("250m"));

    let mut node_selector = template();
    node_selector.node_selector = Some(BTreeMap::from([("disk".into(), "ssd".into())]));

    let mut tolerations = template();
    tolerations.tolerations = Some(vec![Toleration {
        key: Some("dedicated".into()),
        operator: Some("Equal".into()),
        value: Some("adapters".into()),
        effect: Some("NoSchedule".into()),
        ..Default::default()
    }]);

    let mut annotations = template();
    annotations
        .pod_annotations
        .insert("sidecar.istio.io/inject".into(), "false".into());

    vec![
        ("resources", resources),
        ("nodeSelector", node_selector),
        ("tolerations", tolerations),
        ("annotations", annotations),
    ]
}

pub fn available(mut deployment: Deployment) -> Deployment {
    deployment.status = Some(DeploymentStatus {
        conditions: Some(vec![DeploymentCondition {
            type_: "Available".into(),
            status: "True".into(),
            reason: Some("MinimumReplicasAvailable".into()),
            ..Default::default()
        }]),
        ..Default::default()
    });
    deployment
}

pub fn ready_service(mut service: Service, url: &str) -> Service {
    service.status = Some(ServiceStatus {
        conditions: Some(vec![KnativeCondition {
            type_: "Ready".into(),
            status: "True".into(),
            reason: None,
            message: None,
            last_transition_time: None,
        }]),
        observed_generation: service.metadata.generation,
        url: Some(url.into()),
        ..Default::default()
    });
    service
}

/// A mutation the code under test asked a FakeApi for, by object name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutatingCall {
    Create(String),
    Update(String),
    Patch(String),
    PatchStatus(String),
    Delete(String),
}

/// In-memory `ObjectApi` recording every mutation attempted against it, failed ones included.
pub struct FakeApi<K> {
    objects: Mutex<BTreeMap<(String, String), K>>,
    calls: Mutex<Vec<MutatingCall>>,
    next_error: Mutex<Option<kube::Error>>,
    next_uid: AtomicUsize,
}

impl<K> Default for FakeApi<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            next_error: Mutex::new(None),
            next_uid: AtomicUsize::new(1),
        }
    }
}

impl<K> FakeApi<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn mutating_calls(&self) -> Vec<MutatingCall> {
        self.calls.lock().unwrap().clone()
    }

    /// The next mutating call fails with err.
    pub fn fail_next_with(&self, err: kube::Error) {
        *self.next_error.lock().unwrap() = Some(err);
    }

    /// Seeds an object, as if created behind our back.
    pub fn insert(&self, namespace: &str, mut obj: K) {
        self.stamp(namespace, &mut obj);
        self.objects
            .lock()
            .unwrap()
            .insert((namespace.into(), obj.name_any()), obj);
    }

    pub fn objects(&self) -> Vec<K> {
        self.objects.lock().unwrap().values().cloned().collect()
    }

    fn record(&self, call: MutatingCall) -> Result<(), kube::Error> {
        self.calls.lock().unwrap().push(call);
        match self.next_error.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn stamp(&self, namespace: &str, obj: &mut K) {
        let meta = obj.meta_mut();
        meta.namespace = Some(namespace.into());
        if meta.uid.is_none() {
            let uid = self.next_uid.fetch_add(1, Ordering::SeqCst);
            meta.uid = Some(format!("fake-uid-{uid}"));
        }
        let version = meta
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        meta.resource_version = Some((version + 1).to_string());
    }

    fn merge_into(&self, namespace: &str, name: &str, patch: &Value) -> Result<K, kube::Error> {
        let mut objects = self.objects.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        let current = objects.get(&key).ok_or_else(|| api_error(404, "NotFound"))?;

        let mut value = serde_json::to_value(current).unwrap();
        json_merge(&mut value, patch);
        let mut merged: K = serde_json::from_value(value).unwrap();
        self.stamp(namespace, &mut merged);
        objects.insert(key, merged.clone());
        Ok(merged)
    }
}

fn patch_body(patch: &Patch<Value>) -> Value {
    match patch {
        Patch::Apply(v) | Patch::Merge(v) | Patch::Strategic(v) => v.clone(),
        _ => Value::Null,
    }
}

fn json_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (k, v) in patch {
                if v.is_null() {
                    target.remove(k);
                } else {
                    json_merge(target.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[async_trait]
impl<K> ObjectApi<K> for FakeApi<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn create(&self, namespace: &str, obj: &K) -> Result<K, kube::Error> {
        let name = obj.name_any();
        self.record(MutatingCall::Create(name.clone()))?;

        let key = (namespace.to_string(), name);
        if self.objects.lock().unwrap().contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut created = obj.clone();
        self.stamp(namespace, &mut created);
        self.objects.lock().unwrap().insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, namespace: &str, obj: &K) -> Result<K, kube::Error> {
        let name = obj.name_any();
        self.record(MutatingCall::Update(name.clone()))?;

        let mut updated = obj.clone();
        self.stamp(namespace, &mut updated);
        self.objects
            .lock()
            .unwrap()
            .insert((namespace.into(), name), updated.clone());
        Ok(updated)
    }

    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &Patch<Value>,
    ) -> Result<K, kube::Error> {
        self.record(MutatingCall::Patch(name.into()))?;
        let mut body = patch_body(patch);
        if let Value::Object(body) = &mut body {
            body.remove("status");
        }
        self.merge_into(namespace, name, &body)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Patch<Value>,
    ) -> Result<K, kube::Error> {
        self.record(MutatingCall::PatchStatus(name.into()))?;
        let status = patch_body(patch)
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        self.merge_into(namespace, name, &json!({ "status": status }))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.record(MutatingCall::Delete(name.into()))?;
        self.objects
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, kube::Error> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// `SinkResolver` with a canned answer.
pub enum FakeSinkResolver {
    Resolving(Url),
    NotFound,
    Unavailable,
}

impl FakeSinkResolver {
    pub fn resolving(url: &str) -> Self {
        FakeSinkResolver::Resolving(Url::parse(url).unwrap())
    }

    pub fn not_found() -> Self {
        FakeSinkResolver::NotFound
    }

    pub fn unavailable() -> Self {
        FakeSinkResolver::Unavailable
    }
}

#[async_trait]
impl SinkResolver for FakeSinkResolver {
    async fn resolve(
        &self,
        destination: &Destination,
        namespace: &str,
    ) -> Result<Url, ResolveError> {
        match self {
            FakeSinkResolver::Resolving(url) => Ok(url.clone()),
            FakeSinkResolver::NotFound => {
                let reference = destination.reference.clone().unwrap_or_default();
                Err(ResolveError::NotFound {
                    kind: reference.kind,
                    namespace: namespace.into(),
                    name: reference.name,
                })
            }
            FakeSinkResolver::Unavailable => {
                Err(ResolveError::Kube(api_error(503, "ServiceUnavailable")))
            }
        }
    }
}
