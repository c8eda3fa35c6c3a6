//! Relocation strategy engine
//!
//! Decides how a pod gets to its new scheduler or node and drives the
//! sequence of cluster calls. Calls are issued one at a time and never
//! retried; a failure is returned with the step that produced it. There is no
//! rollback: if a delete lands and the following create fails, the pod stays
//! gone.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use k8s_openapi::api::core::v1::{Pod, ReplicationController};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::convergence::{classify, Waiter};
use super::placement::{schedulable_names, Placement};
use super::projector::{pin_to_node, project, with_scheduler};
use super::selector::{controller_selector, RUNNING_PHASE_SELECTOR};
use super::types::{
    ObjectRef, Outcome, OutcomeStatus, PodPhase, RelocationIntent, Strategy, Target,
};
use crate::config::RelocatorConfig;
use crate::error::{Error, ObjectKind, Result, Step};
use crate::k8s::{ClusterApi, PodFilter};

const REPLICATION_CONTROLLER_KIND: &str = "ReplicationController";

/// Moves pods between schedulers and nodes
pub struct Relocator<C, R = StdRng> {
    client: C,
    config: RelocatorConfig,
    waiter: Waiter,
    rng: R,
}

impl<C: ClusterApi> Relocator<C, StdRng> {
    pub fn new(client: C, config: RelocatorConfig) -> Self {
        Self::with_rng(client, config, StdRng::from_entropy())
    }
}

impl<C: ClusterApi, R: RngCore + Send> Relocator<C, R> {
    /// Build an engine drawing node and victim choices from `rng`
    pub fn with_rng(client: C, config: RelocatorConfig, rng: R) -> Self {
        let waiter = Waiter::new(config.poll_interval(), CancellationToken::new());
        Self {
            client,
            config,
            waiter,
            rng,
        }
    }

    /// Abort waits when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.waiter = Waiter::new(self.config.poll_interval(), token);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &RelocatorConfig {
        &self.config
    }

    /// Relocate a pod to `scheduler`, optionally pinned to `node`.
    ///
    /// Controller-owned pods go through their controller's template; others
    /// are deleted and recreated.
    pub async fn relocate_pod(
        &mut self,
        namespace: &str,
        name: &str,
        scheduler: &str,
        node: Option<String>,
    ) -> Result<Outcome> {
        let intent = RelocationIntent::new(Target::pod(namespace, name), Strategy::Auto)
            .with_scheduler(scheduler)
            .with_placement(Placement::node_or(node, Placement::Scheduler));
        self.relocate(intent).await
    }

    /// Execute a relocation request
    #[instrument(skip(self), fields(strategy = %intent.strategy))]
    pub async fn relocate(&mut self, intent: RelocationIntent) -> Result<Outcome> {
        let RelocationIntent {
            target,
            scheduler,
            placement,
            strategy,
        } = intent;

        match strategy {
            Strategy::ControllerTemplate => {
                let rc = controller_target(&target, strategy)?;
                let scheduler = self.scheduler_or_default(scheduler);
                self.update_controller_template(&rc.namespace, &rc.name, &scheduler)
                    .await
            }
            Strategy::MoveReplica => {
                let rc = controller_target(&target, strategy)?;
                self.move_replica(&rc.namespace, &rc.name, scheduler.as_deref(), placement)
                    .await
            }
            Strategy::InPlace => {
                let pod = self.resolve_pod(&target).await?;
                let scheduler = self.scheduler_or_default(scheduler);
                self.update_in_place(&pod, &scheduler).await
            }
            Strategy::Recreate => {
                let pod = self.resolve_pod(&target).await?;
                self.recreate(&pod, scheduler.as_deref(), &placement).await
            }
            Strategy::Auto => {
                let pod = self.resolve_pod(&target).await?;
                let owner = self.live_owner(&pod).await?;
                match owner {
                    // The template cannot carry a node, so a requested node
                    // means recreating this pod directly
                    Some(rc) if placement.needs_inventory() => {
                        warn!(
                            controller = ?rc.metadata.name,
                            placement = ?placement,
                            "Node requested for a controller-owned pod, recreating it directly"
                        );
                        self.recreate(&pod, scheduler.as_deref(), &placement).await
                    }
                    Some(rc) => {
                        let scheduler = self.scheduler_or_default(scheduler);
                        self.roll_through_controller(&pod, &rc, &scheduler).await
                    }
                    None => self.recreate(&pod, scheduler.as_deref(), &placement).await,
                }
            }
        }
    }

    fn scheduler_or_default(&self, scheduler: Option<String>) -> String {
        scheduler.unwrap_or_else(|| self.config.scheduler_name.clone())
    }

    async fn resolve_pod(&self, target: &Target) -> Result<Pod> {
        match target {
            Target::Pod { namespace, name } => self.client.get_pod(namespace, name).await,
            Target::PodUid { namespace, uid } => self.find_pod_by_uid(namespace, uid).await,
            Target::Controller { .. } => Err(Error::InvalidIntent(
                "a pod target is required for this strategy".to_string(),
            )),
        }
    }

    /// Look a pod up by `metadata.uid`. The API server cannot filter on uid,
    /// so the namespace is listed and matched here.
    #[instrument(skip(self))]
    pub async fn find_pod_by_uid(&self, namespace: &str, uid: &str) -> Result<Pod> {
        let pods = self
            .client
            .list_pods(namespace, &PodFilter::default())
            .await?;

        pods.into_iter()
            .find(|p| p.metadata.uid.as_deref() == Some(uid))
            .ok_or_else(|| Error::NotFound {
                kind: ObjectKind::Pod,
                namespace: namespace.to_string(),
                name: uid.to_string(),
            })
    }

    /// The replication controller that would recreate `pod` if it were
    /// deleted, if there is one and it still exists.
    async fn live_owner(&self, pod: &Pod) -> Result<Option<ReplicationController>> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        let owners = pod.metadata.owner_references.as_deref().unwrap_or_default();

        let Some(owner) = owners.iter().find(|o| o.controller == Some(true)) else {
            return Ok(None);
        };

        if owner.kind != REPLICATION_CONTROLLER_KIND {
            warn!(
                owner_kind = %owner.kind,
                owner = %owner.name,
                "Pod is controlled by an unsupported owner kind, treating it as standalone"
            );
            return Ok(None);
        }

        match self.client.get_controller(namespace, &owner.name).await {
            Ok(rc) => Ok(Some(rc)),
            Err(e) if e.is_not_found() => {
                info!(owner = %owner.name, "Owning controller no longer exists");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn inventory(&self) -> Result<Vec<String>> {
        let nodes = self.client.list_nodes().await?;
        Ok(schedulable_names(&nodes))
    }

    async fn place(&mut self, placement: &Placement) -> Result<Option<String>> {
        if !placement.needs_inventory() {
            return Ok(None);
        }
        let inventory = self.inventory().await?;
        placement.select(&inventory, &mut self.rng)
    }

    /// Replace the pod with a copy carrying the new scheduler name. The API
    /// server normally refuses this for running pods.
    #[instrument(skip(self, pod), fields(pod = %ObjectRef::of_pod(pod)))]
    async fn update_in_place(&self, pod: &Pod, scheduler: &str) -> Result<Outcome> {
        let current = pod.spec.as_ref().and_then(|s| s.scheduler_name.as_deref());
        info!(?current, desired = scheduler, "Updating pod in place");

        let desired = with_scheduler(pod.clone(), scheduler);
        self.client.update_pod(&desired).await?;

        let object = ObjectRef::of_pod(pod);
        let fresh = self.client.get_pod(&object.namespace, &object.name).await?;
        let applied = fresh.spec.as_ref().and_then(|s| s.scheduler_name.as_deref());

        if applied != Some(scheduler) {
            warn!(?applied, "Scheduler name was not applied");
            return Ok(Outcome::observed(
                &fresh,
                OutcomeStatus::Failed {
                    reason: "scheduler name not applied".to_string(),
                },
            ));
        }
        Ok(Outcome::observed(&fresh, classify(&fresh).into_status()))
    }

    /// Delete the pod and create its projection under the same name.
    #[instrument(skip(self, pod, placement), fields(pod = %ObjectRef::of_pod(pod)))]
    async fn recreate(
        &mut self,
        pod: &Pod,
        scheduler: Option<&str>,
        placement: &Placement,
    ) -> Result<Outcome> {
        let object = ObjectRef::of_pod(pod);

        // Decide the node before anything destructive happens
        let node = self.place(placement).await?;

        let mut replacement = project(pod);
        if let Some(scheduler) = scheduler {
            replacement = with_scheduler(replacement, scheduler);
        }
        if let Some(node) = &node {
            replacement = pin_to_node(replacement, node);
        }

        self.save_snapshot(&replacement).await?;

        info!(grace = self.config.delete_grace_seconds, "Begin to kill pod");
        self.client
            .delete_pod(
                &object.namespace,
                &object.name,
                self.config.delete_grace_seconds,
            )
            .await?;

        let gone = self
            .waiter
            .until_gone(
                &self.client,
                &object.namespace,
                &object.name,
                self.config.gone_timeout(),
            )
            .await?;
        if !gone {
            warn!("Old pod still present, creating anyway");
        }

        self.create_replacement(&replacement).await?;

        self.waiter
            .until_settled(
                &self.client,
                &object.namespace,
                &object.name,
                self.config.settle_timeout(),
            )
            .await
    }

    async fn create_replacement(&self, replacement: &Pod) -> Result<Pod> {
        let object = ObjectRef::of_pod(replacement);
        let node = replacement.spec.as_ref().and_then(|s| s.node_name.as_deref());
        info!(pod = %object, ?node, "Begin to create pod");

        self.client.create_pod(replacement).await.map_err(|e| {
            error!(pod = %object, error = %e, "Failed to create pod, it is left deleted");
            e
        })
    }

    /// Point the controller's template at `scheduler`, then delete the pod so
    /// the controller recreates it from the new template.
    #[instrument(skip(self, pod, rc), fields(pod = %ObjectRef::of_pod(pod)))]
    async fn roll_through_controller(
        &self,
        pod: &Pod,
        rc: &ReplicationController,
        scheduler: &str,
    ) -> Result<Outcome> {
        let object = ObjectRef::of_pod(pod);
        let rc_name = rc.metadata.name.clone().unwrap_or_default();
        let selector = controller_selector(rc)?;
        info!(controller = %rc_name, "Pod is owned by a replication controller");

        self.client
            .update_controller(&with_template_scheduler(rc, scheduler))
            .await?;

        // Only pods created after the delete count as the replacement
        let filter = PodFilter::default().labels(selector);
        let mut existing: HashSet<String> = self
            .client
            .list_pods(&object.namespace, &filter)
            .await?
            .into_iter()
            .filter_map(|p| p.metadata.uid)
            .collect();
        existing.extend(pod.metadata.uid.clone());

        self.client
            .delete_pod(
                &object.namespace,
                &object.name,
                self.config.delete_grace_seconds,
            )
            .await?;

        let is_replacement = |p: &Pod| {
            p.metadata
                .uid
                .as_ref()
                .map_or(false, |uid| !existing.contains(uid))
                && p.metadata.deletion_timestamp.is_none()
                && p.spec.as_ref().and_then(|s| s.scheduler_name.as_deref()) == Some(scheduler)
        };

        let client = &self.client;
        let namespace = object.namespace.as_str();
        let (filter_ref, matches) = (&filter, &is_replacement);
        let settled = self
            .waiter
            .poll(Step::WaitSettled, self.config.settle_timeout(), || async move {
                let pods = client.list_pods(namespace, filter_ref).await?;
                Ok(pods.into_iter().find(|p| {
                    let phase = PodPhase::of(p);
                    matches(p) && (phase == PodPhase::Running || phase.is_terminal())
                }))
            })
            .await?;

        let replacement = match settled {
            Some(pod) => Some(pod),
            None => self
                .client
                .list_pods(&object.namespace, &filter)
                .await?
                .into_iter()
                .find(|p| is_replacement(p)),
        };

        Ok(match replacement {
            Some(pod) => Outcome::observed(&pod, classify(&pod).into_status()),
            None => {
                info!(controller = %rc_name, "No replacement pod yet");
                let mut outcome = Outcome::new(
                    ObjectRef::new(&object.namespace, &rc_name),
                    OutcomeStatus::Pending,
                );
                outcome.scheduler = Some(scheduler.to_string());
                outcome
            }
        })
    }

    /// Update a controller's template scheduler and confirm it was stored.
    /// Existing pods keep running until the controller replaces them.
    #[instrument(skip(self))]
    async fn update_controller_template(
        &self,
        namespace: &str,
        name: &str,
        scheduler: &str,
    ) -> Result<Outcome> {
        let rc = self.client.get_controller(namespace, name).await?;
        info!(
            current = ?template_scheduler(&rc),
            replicas = ?rc.spec.as_ref().and_then(|s| s.replicas),
            "ReplicationController"
        );

        self.client
            .update_controller(&with_template_scheduler(&rc, scheduler))
            .await?;

        let fresh = self.client.get_controller(namespace, name).await?;
        let applied = template_scheduler(&fresh);
        let object = ObjectRef::new(namespace, name);

        let mut outcome = if applied == Some(scheduler) {
            Outcome::new(object, OutcomeStatus::Success)
        } else {
            warn!(?applied, "Template scheduler was not applied");
            Outcome::failed(object, "template scheduler not applied")
        };
        outcome.scheduler = applied.map(str::to_string);
        Ok(outcome)
    }

    /// Kill one running replica of a controller and recreate it, same name,
    /// bound to a chosen node.
    ///
    /// Best effort: the controller may create its own replacement before our
    /// create lands, leaving one pod too many until it scales back down.
    #[instrument(skip(self, placement))]
    async fn move_replica(
        &mut self,
        namespace: &str,
        name: &str,
        scheduler: Option<&str>,
        placement: Placement,
    ) -> Result<Outcome> {
        // Without a pinned node the controller wins the race every time
        let placement = match placement {
            Placement::Scheduler => Placement::Random,
            other => other,
        };

        let inventory = self.inventory().await?;
        info!(nodes = inventory.len(), "Node inventory");

        let rc = self.client.get_controller(namespace, name).await?;
        let selector = controller_selector(&rc)?;
        info!(%selector, "Listing running pods of controller");

        let filter = PodFilter::default()
            .labels(selector)
            .fields(RUNNING_PHASE_SELECTOR);
        let candidates: Vec<Pod> = self
            .client
            .list_pods(namespace, &filter)
            .await?
            .into_iter()
            .filter(|p| PodPhase::of(p) == PodPhase::Running)
            .filter(|p| p.metadata.deletion_timestamp.is_none())
            .collect();

        let Some(victim) = candidates.choose(&mut self.rng).cloned() else {
            warn!(controller = name, "No living pods for controller");
            return Ok(Outcome::failed(ObjectRef::new(namespace, name), "no running pods"));
        };
        let node = placement
            .select(&inventory, &mut self.rng)?
            .ok_or(Error::EmptyInventory)?;

        let object = ObjectRef::of_pod(&victim);
        let mut replacement = pin_to_node(project(&victim), &node);
        if let Some(scheduler) = scheduler {
            replacement = with_scheduler(replacement, scheduler);
        }

        self.save_snapshot(&replacement).await?;

        info!(pod = %object, "Begin to kill pod");
        self.client
            .delete_pod(
                &object.namespace,
                &object.name,
                self.config.victim_grace_seconds,
            )
            .await?;

        self.create_replacement(&replacement).await?;

        self.waiter
            .until_settled(
                &self.client,
                &object.namespace,
                &object.name,
                self.config.settle_timeout(),
            )
            .await
    }

    async fn save_snapshot(&self, pod: &Pod) -> Result<()> {
        if let Some(dir) = &self.config.snapshot_dir {
            let path = write_snapshot(dir, pod).await?;
            info!(path = %path.display(), "Saved pod manifest");
        }
        Ok(())
    }
}

fn controller_target(target: &Target, strategy: Strategy) -> Result<ObjectRef> {
    match target {
        Target::Controller { namespace, name } => Ok(ObjectRef::new(namespace, name)),
        _ => Err(Error::InvalidIntent(format!(
            "{} requires a replication controller target",
            strategy
        ))),
    }
}

fn template_scheduler(rc: &ReplicationController) -> Option<&str> {
    rc.spec
        .as_ref()
        .and_then(|s| s.template.as_ref())
        .and_then(|t| t.spec.as_ref())
        .and_then(|s| s.scheduler_name.as_deref())
}

/// Copy of `rc` whose pod template uses `scheduler`
pub fn with_template_scheduler(rc: &ReplicationController, scheduler: &str) -> ReplicationController {
    let mut updated = rc.clone();
    updated
        .spec
        .get_or_insert_with(Default::default)
        .template
        .get_or_insert_with(Default::default)
        .spec
        .get_or_insert_with(Default::default)
        .scheduler_name = Some(scheduler.to_string());
    updated
}

/// Write the manifest of a pod about to be recreated, for manual recovery
/// if the create never lands.
pub async fn write_snapshot(dir: &Path, pod: &Pod) -> Result<PathBuf> {
    let object = ObjectRef::of_pod(pod);
    let yaml = serde_yaml::to_string(pod)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}-{}.yaml", object.namespace, object.name));
    tokio::fs::write(&path, yaml).await?;
    Ok(path)
}
