use thiserror::Error;

use reconcilers::sink::ResolveError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),

    #[error("Failed to resolve sink: {0}")]
    SinkResolution(#[source] ResolveError),

    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::KubeError(_) => "KubeError",
            Error::MissingObjectKey(_) => "MissingObjectKey",
            Error::SinkResolution(_) => "SinkResolution",
            Error::InvalidUrl(_) => "InvalidUrl",
        }
    }
}

pub mod controllers;
pub use controllers::{run, State};

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use metrics::Metrics;

/// Generic adapter, RBAC and ownership machinery shared by every component kind
pub mod reconcilers;

/// Component CRDs and the external CRDs we create
pub mod resources;

#[cfg(test)]
pub(crate) mod fixtures;
