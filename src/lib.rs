use controllers::nodepool::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} was modified concurrently; the update used a stale resourceVersion")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{0} has no name or namespace set")]
    MissingObjectKey(String),

    #[error("The HostedCluster {0} does not exist")]
    HostedClusterNotFound(String),

    #[error("Error validating autoscaling parameters: {0}")]
    Validation(#[from] ValidationError),

    #[error(
        "NodePool current version {observed} does not match MachineDeployment version {template}"
    )]
    InvariantViolation { observed: String, template: String },

    #[error("Failed to obtain AMI: {0}")]
    ImageLookup(String),

    #[error("Failed to look up release image {image}: {reason}")]
    ReleaseLookup { image: String, reason: String },

    #[error("NodePool {0} has no AWS platform configuration")]
    UnsupportedPlatform(String),

    #[error("HostedCluster {0} does not report a release image")]
    MissingReleaseImage(String),

    #[error("Failed to persist NodePool: {0}")]
    Persist(#[source] Box<Error>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::KubeError(_) => "KubeError",
            Error::NotFound { .. } => "NotFound",
            Error::AlreadyExists { .. } => "AlreadyExists",
            Error::Conflict { .. } => "Conflict",
            Error::MissingObjectKey(_) => "MissingObjectKey",
            Error::HostedClusterNotFound(_) => "HostedClusterNotFound",
            Error::Validation(_) => "ValidationFailed",
            Error::InvariantViolation { .. } => "InvariantViolation",
            Error::ImageLookup(_) => "ImageLookup",
            Error::ReleaseLookup { .. } => "ReleaseLookup",
            Error::UnsupportedPlatform(_) => "UnsupportedPlatform",
            Error::MissingReleaseImage(_) => "MissingReleaseImage",
            Error::Persist(_) => "PersistFailure",
        }
    }

    /// Whether the error means the addressed object is absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::KubeError(kube::Error::Api(err)) => err.code == 404,
            _ => false,
        }
    }
}

pub mod controllers;
pub use controllers::nodepool::run;
pub use controllers::State;

/// Kubernetes events
pub mod events;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use metrics::Metrics;

/// Machine image and release metadata lookups
pub mod providers;

/// External CRDs
pub mod resources;

/// Object CRUD behind a trait, so the reconciler can run against a fake
pub mod store;
