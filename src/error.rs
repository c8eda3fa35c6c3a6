//! Error types for pod relocation
//!
//! Every failure coming back from the cluster is tagged with the [`Step`] that
//! produced it so callers can tell, for instance, a failed delete from a failed
//! create. Nothing in this crate retries.

use std::fmt;

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The cluster operation (or wait) a relocation was performing
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Step {
    GetPod,
    UpdatePod,
    DeletePod,
    CreatePod,
    ListPods,
    GetController,
    UpdateController,
    ListNodes,
    WaitGone,
    WaitSettled,
}

/// Kind of object a `NotFound` refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Pod,
    ReplicationController,
    Node,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Pod => write!(f, "pod"),
            ObjectKind::ReplicationController => write!(f, "replicationcontroller"),
            ObjectKind::Node => write!(f, "node"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: ObjectKind,
        namespace: String,
        name: String,
    },

    #[error("{step} rejected by the cluster: {message}")]
    Forbidden { step: Step, message: String },

    #[error("{step} conflicted: {message}")]
    Conflict { step: Step, message: String },

    #[error("node inventory is empty, no placement target available")]
    EmptyInventory,

    #[error("{step} failed: {source}")]
    Transient {
        step: Step,
        #[source]
        source: kube::Error,
    },

    #[error("invalid relocation request: {0}")]
    InvalidIntent(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{step} cancelled")]
    Cancelled { step: Step },

    #[error("failed to write pod snapshot: {0}")]
    Snapshot(#[from] std::io::Error),
}

impl Error {
    /// Classify a `kube` error returned while performing `step`.
    ///
    /// `kind`, `namespace` and `name` describe the object the call addressed
    /// and are only used to build `NotFound`.
    pub fn from_kube(
        step: Step,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        err: kube::Error,
    ) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => Error::NotFound {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                },
                403 | 422 => Error::Forbidden {
                    step,
                    message: resp.message,
                },
                409 => Error::Conflict {
                    step,
                    message: resp.message,
                },
                _ => Error::Transient {
                    step,
                    source: kube::Error::Api(resp),
                },
            },
            other => Error::Transient {
                step,
                source: other,
            },
        }
    }

    /// The step that failed, when the error came from a cluster call or wait
    pub fn step(&self) -> Option<Step> {
        match self {
            Error::Forbidden { step, .. }
            | Error::Conflict { step, .. }
            | Error::Transient { step, .. }
            | Error::Cancelled { step } => Some(*step),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
