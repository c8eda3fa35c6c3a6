//! Relocation request and result types

use std::fmt;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

use super::placement::Placement;

/// Observed lifecycle phase of a pod
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl PodPhase {
    pub fn of(pod: &Pod) -> Self {
        pod.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(PodPhase::from)
            .unwrap_or(PodPhase::Unknown)
    }

    /// Succeeded and Failed pods never run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

/// Namespaced name of an object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of_pod(pod: &Pod) -> Self {
        Self::new(
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        )
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What a relocation acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Pod { namespace: String, name: String },
    /// A pod identified by its `metadata.uid`
    PodUid { namespace: String, uid: String },
    Controller { namespace: String, name: String },
}

impl Target {
    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Target::Pod {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn controller(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Target::Controller {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Pod { namespace, name } => write!(f, "pod {}/{}", namespace, name),
            Target::PodUid { namespace, uid } => write!(f, "pod {}/uid={}", namespace, uid),
            Target::Controller { namespace, name } => {
                write!(f, "replicationcontroller {}/{}", namespace, name)
            }
        }
    }
}

/// Which relocation path to take
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Strategy {
    /// Template update for controller-owned pods, recreate otherwise
    #[default]
    Auto,
    /// Replace the pod object directly
    InPlace,
    /// Delete the pod and create its projection
    Recreate,
    /// Update a controller's pod template only
    ControllerTemplate,
    /// Kill one running replica of a controller and recreate it on a node
    MoveReplica,
}

/// A single relocation request. Consumed once.
#[derive(Debug, Clone)]
pub struct RelocationIntent {
    pub target: Target,
    pub scheduler: Option<String>,
    pub placement: Placement,
    pub strategy: Strategy,
}

impl RelocationIntent {
    pub fn new(target: Target, strategy: Strategy) -> Self {
        Self {
            target,
            scheduler: None,
            placement: Placement::Scheduler,
            strategy,
        }
    }

    pub fn with_scheduler(mut self, scheduler: impl Into<String>) -> Self {
        self.scheduler = Some(scheduler.into());
        self
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }
}

/// Final classification of a relocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Pending,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub object: ObjectRef,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    pub node: Option<String>,
    pub scheduler: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl Outcome {
    pub fn new(object: ObjectRef, status: OutcomeStatus) -> Self {
        Self {
            object,
            status,
            node: None,
            scheduler: None,
            observed_at: Utc::now(),
        }
    }

    /// Build an outcome from a freshly read pod
    pub fn observed(pod: &Pod, status: OutcomeStatus) -> Self {
        let spec = pod.spec.as_ref();
        Self {
            node: spec.and_then(|s| s.node_name.clone()),
            scheduler: spec.and_then(|s| s.scheduler_name.clone()),
            ..Self::new(ObjectRef::of_pod(pod), status)
        }
    }

    pub fn failed(object: ObjectRef, reason: impl Into<String>) -> Self {
        Self::new(
            object,
            OutcomeStatus::Failed {
                reason: reason.into(),
            },
        )
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            OutcomeStatus::Success => write!(f, "{}: success", self.object)?,
            OutcomeStatus::Pending => write!(f, "{}: pending", self.object)?,
            OutcomeStatus::Failed { reason } => write!(f, "{}: failed ({})", self.object, reason)?,
        }
        if let Some(node) = &self.node {
            write!(f, ", node:{}", node)?;
        }
        if let Some(scheduler) = &self.scheduler {
            write!(f, ", scheduler:{}", scheduler)?;
        }
        Ok(())
    }
}
