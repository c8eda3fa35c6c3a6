//! Command line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use k8s_openapi::api::core::v1::Pod;

use pod_relocator::config::{ConnectionConfig, RelocatorConfig};
use pod_relocator::relocation::{Placement, RelocationIntent, Strategy, Target};

#[derive(Debug, Parser)]
#[command(name = "pod-relocator", version, about = "Move pods between schedulers and nodes")]
pub struct Cli {
    /// Master URL of the API server
    #[arg(long = "masterUrl", env = "RELOCATOR_MASTER_URL", global = true)]
    pub master_url: Option<String>,

    /// Absolute path to the kubeconfig file
    #[arg(long = "kubeConfig", env = "RELOCATOR_KUBECONFIG", global = true)]
    pub kube_config: Option<PathBuf>,

    /// Kubernetes object namespace [default: default]
    #[arg(long = "nameSpace", global = true)]
    pub namespace: Option<String>,

    /// The name of the scheduler [default: default-scheduler]. Recreated
    /// pods keep their own scheduler unless this is given.
    #[arg(long = "scheduler-name", env = "RELOCATOR_SCHEDULER_NAME", global = true)]
    pub scheduler_name: Option<String>,

    /// Print the outcome and logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print pods with their phase, node and host
    ListPods {
        /// List pods in every namespace
        #[arg(long)]
        all_namespaces: bool,

        /// Only pods bound to this node
        #[arg(long = "on-node")]
        on_node: Option<String>,
    },
    /// Print the schedulable nodes
    ListNodes,
    /// Change the scheduler of a pod by updating it in place
    UpdatePod(PodArgs),
    /// Delete a pod and create it again for the new scheduler or node
    RecreatePod {
        #[command(flatten)]
        pod: PodArgs,

        #[command(flatten)]
        node: NodeArgs,
    },
    /// Relocate a pod, through its controller when it has one
    Relocate {
        #[command(flatten)]
        pod: PodArgs,

        #[command(flatten)]
        node: NodeArgs,
    },
    /// Change the scheduler in a replication controller's pod template
    UpdateController(ControllerArgs),
    /// Move one running replica of a replication controller to another node
    MoveReplica {
        #[command(flatten)]
        controller: ControllerArgs,

        /// Destination node, random when omitted
        #[arg(long = "nodeName")]
        node_name: Option<String>,
    },
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct PodArgs {
    /// The pod to be handled
    #[arg(long = "podName")]
    pub pod_name: Option<String>,

    /// The pod to be handled, by uid
    #[arg(long)]
    pub uuid: Option<String>,
}

#[derive(Debug, Args)]
pub struct NodeArgs {
    /// Bind the new pod to this node
    #[arg(long = "nodeName", conflicts_with = "random_node")]
    pub node_name: Option<String>,

    /// Bind the new pod to a random schedulable node
    #[arg(long)]
    pub random_node: bool,
}

impl NodeArgs {
    fn placement(&self) -> Placement {
        let fallback = if self.random_node {
            Placement::Random
        } else {
            Placement::Scheduler
        };
        Placement::node_or(self.node_name.clone(), fallback)
    }
}

#[derive(Debug, Args)]
pub struct ControllerArgs {
    /// The ReplicationController name
    #[arg(long = "rcName")]
    pub rc_name: String,
}

impl Cli {
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            master_url: self.master_url.clone(),
            kubeconfig: self.kube_config.clone(),
        }
    }

    /// Flags take precedence over environment settings
    pub fn apply(&self, mut config: RelocatorConfig) -> RelocatorConfig {
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(scheduler) = &self.scheduler_name {
            config.scheduler_name = scheduler.clone();
        }
        config
    }

    /// The relocation this invocation asks for, `None` for listings
    pub fn intent(&self, config: &RelocatorConfig) -> Option<RelocationIntent> {
        let ns = config.namespace.as_str();

        let intent = match &self.command {
            Command::ListPods { .. } | Command::ListNodes => return None,
            Command::UpdatePod(pod) => {
                return Some(
                    RelocationIntent::new(pod.target(ns), Strategy::InPlace)
                        .with_scheduler(config.scheduler_name.as_str()),
                )
            }
            Command::RecreatePod { pod, node } => {
                RelocationIntent::new(pod.target(ns), Strategy::Recreate)
                    .with_placement(node.placement())
            }
            Command::Relocate { pod, node } => RelocationIntent::new(pod.target(ns), Strategy::Auto)
                .with_placement(node.placement()),
            Command::UpdateController(rc) => {
                return Some(
                    RelocationIntent::new(
                        Target::controller(ns, &rc.rc_name),
                        Strategy::ControllerTemplate,
                    )
                    .with_scheduler(config.scheduler_name.as_str()),
                )
            }
            Command::MoveReplica {
                controller,
                node_name,
            } => RelocationIntent::new(
                Target::controller(ns, &controller.rc_name),
                Strategy::MoveReplica,
            )
            .with_placement(Placement::node_or(node_name.clone(), Placement::Random)),
        };

        // Projections keep the pod's scheduler unless one was asked for
        Some(match &self.scheduler_name {
            Some(scheduler) => intent.with_scheduler(scheduler.as_str()),
            None => intent,
        })
    }
}

impl PodArgs {
    fn target(&self, namespace: &str) -> Target {
        match (&self.pod_name, &self.uuid) {
            (Some(name), _) => Target::pod(namespace, name),
            (None, Some(uid)) => Target::PodUid {
                namespace: namespace.to_string(),
                uid: uid.clone(),
            },
            // clap enforces one of the two
            (None, None) => Target::pod(namespace, ""),
        }
    }
}

pub fn format_pod(pod: &Pod) -> String {
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown");
    let node = pod
        .spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .unwrap_or_default();
    let host = pod
        .status
        .as_ref()
        .and_then(|s| s.host_ip.as_deref())
        .unwrap_or_default();

    format!(
        "{}/{}, phase:{}, node.Name:{}, host:{}",
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default(),
        phase,
        node,
        host
    )
}
