use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::client::Client;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::*;
use url::Url;

use crate::metrics::Metrics;
use crate::reconcilers::adapter::AdapterImages;
use crate::resources::cloudeventssources::CloudEventsSource;
use crate::resources::googlecloudfirestoretargets::GoogleCloudFirestoreTarget;
use crate::resources::sendgridtargets::SendGridTarget;
use crate::resources::solacesources::SolaceSource;

pub mod component;

/// Field manager of every write we make.
pub const FIELD_MANAGER: &str = "integration-operator";

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
        }
    }
}

/// State shared between the controllers and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the reconcilers
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    pub registry: prometheus::Registry,
    /// Where adapter images are pulled from when a component does not override it
    adapter_images: AdapterImages,
    /// Number of components of each kind reconciled concurrently
    concurrency: u16,
}

impl Default for State {
    fn default() -> Self {
        Self::new(AdapterImages::default(), 4)
    }
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(adapter_images: AdapterImages, concurrency: u16) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::default(),
            adapter_images,
            concurrency,
        }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}

/// Runs the controllers of every component kind until shutdown.
pub async fn run(state: State) {
    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create a kube Client: {e:?}");
            std::process::exit(1);
        }
    };
    let metrics = match Metrics::default().register(&state.registry) {
        Ok(metrics) => metrics,
        Err(e) => {
            error!("Failed to register metrics: {e:?}");
            std::process::exit(1);
        }
    };

    tokio::join!(
        component::run::<CloudEventsSource>(client.clone(), metrics.clone(), state.clone()),
        component::run::<SolaceSource>(client.clone(), metrics.clone(), state.clone()),
        component::run::<GoogleCloudFirestoreTarget>(
            client.clone(),
            metrics.clone(),
            state.clone(),
        ),
        component::run::<SendGridTarget>(client, metrics, state),
    );
}

/// The cluster-local URL of a Service, eg. `http://name.ns.svc.cluster.local:8080/path`.
pub fn service_url(
    service_name: &str,
    service_namespace: &str,
    port: Option<i32>,
    path: Option<&str>,
) -> Result<Url, url::ParseError> {
    let mut url = match port {
        Some(port) => Url::parse(&format!(
            "http://{service_name}.{service_namespace}.svc.cluster.local:{port}",
        ))?,
        None => Url::parse(&format!(
            "http://{service_name}.{service_namespace}.svc.cluster.local",
        ))?,
    };

    if let Some(path) = path {
        url.set_path(path)
    }

    Ok(url)
}
