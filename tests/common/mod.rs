//! In-memory cluster shared by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, Node, NodeSpec, Pod, PodSpec, PodStatus, PodTemplateSpec, ReplicationController,
    ReplicationControllerSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use pod_relocator::config::RelocatorConfig;
use pod_relocator::error::{ObjectKind, Step};
use pod_relocator::k8s::{ClusterApi, PodFilter};
use pod_relocator::{Error, Result};

type Key = (String, String);

#[derive(Default)]
struct State {
    pods: BTreeMap<Key, Pod>,
    controllers: BTreeMap<Key, ReplicationController>,
    nodes: Vec<Node>,
    deleted: Vec<(String, String, u32)>,
    created: Vec<Pod>,
    fail_creates: bool,
    reject_pod_updates: bool,
    reconcile: bool,
    next_uid: u32,
}

impl State {
    fn uid(&mut self) -> String {
        self.next_uid += 1;
        format!("uid-{}", self.next_uid)
    }
}

/// Cheap to clone; clones share the same cluster
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn with_nodes(self, names: &[&str]) -> Self {
        self.state().nodes = names.iter().map(|n| node(n, false)).collect();
        self
    }

    pub fn with_cordoned_node(self, name: &str) -> Self {
        self.state().nodes.push(node(name, true));
        self
    }

    pub fn with_pod(self, pod: Pod) -> Self {
        let key = key_of(&pod.metadata);
        self.state().pods.insert(key, pod);
        self
    }

    pub fn with_controller(self, rc: ReplicationController) -> Self {
        let key = key_of(&rc.metadata);
        self.state().controllers.insert(key, rc);
        self
    }

    /// Every create is refused by admission
    pub fn failing_creates(self) -> Self {
        self.state().fail_creates = true;
        self
    }

    /// Pod updates are refused the way the API server refuses spec changes
    pub fn rejecting_pod_updates(self) -> Self {
        self.state().reject_pod_updates = true;
        self
    }

    /// Controllers replace deleted pods from their template
    pub fn reconciling(self) -> Self {
        self.state().reconcile = true;
        self
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.state().pods.values().cloned().collect()
    }

    pub fn controller(&self, namespace: &str, name: &str) -> Option<ReplicationController> {
        self.state()
            .controllers
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn deleted(&self) -> Vec<(String, String, u32)> {
        self.state().deleted.clone()
    }

    pub fn created(&self) -> Vec<Pod> {
        self.state().created.clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.pod(namespace, name)
            .ok_or_else(|| not_found(ObjectKind::Pod, namespace, name))
    }

    async fn update_pod(&self, pod: &Pod) -> Result<Pod> {
        let mut state = self.state();
        if state.reject_pod_updates {
            return Err(Error::Forbidden {
                step: Step::UpdatePod,
                message: "pod updates may not change fields other than spec.containers[*].image"
                    .to_string(),
            });
        }
        let key = key_of(&pod.metadata);
        if !state.pods.contains_key(&key) {
            return Err(not_found(ObjectKind::Pod, &key.0, &key.1));
        }
        state.pods.insert(key, pod.clone());
        Ok(pod.clone())
    }

    async fn delete_pod(&self, namespace: &str, name: &str, grace_period_seconds: u32) -> Result<()> {
        let mut state = self.state();
        let key = (namespace.to_string(), name.to_string());
        let Some(removed) = state.pods.remove(&key) else {
            return Err(not_found(ObjectKind::Pod, namespace, name));
        };
        state
            .deleted
            .push((namespace.to_string(), name.to_string(), grace_period_seconds));

        if state.reconcile {
            let owner = removed
                .metadata
                .owner_references
                .clone()
                .unwrap_or_default()
                .into_iter()
                .find(|o| o.controller == Some(true));
            let rc = owner.and_then(|o| {
                state
                    .controllers
                    .get(&(namespace.to_string(), o.name.clone()))
                    .cloned()
                    .map(|rc| (o, rc))
            });
            if let Some((owner, rc)) = rc {
                let uid = state.uid();
                let replacement = from_template(&rc, &owner, &uid);
                state.pods.insert(key_of(&replacement.metadata), replacement);
            }
        }
        Ok(())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let mut state = self.state();
        if state.fail_creates {
            return Err(Error::Forbidden {
                step: Step::CreatePod,
                message: "admission webhook denied the request".to_string(),
            });
        }
        let key = key_of(&pod.metadata);
        if state.pods.contains_key(&key) {
            return Err(Error::Conflict {
                step: Step::CreatePod,
                message: format!("pods \"{}\" already exists", key.1),
            });
        }

        let mut created = pod.clone();
        created.metadata.uid = Some(state.uid());
        created.status = Some(running());
        state.pods.insert(key, created.clone());
        state.created.push(created.clone());
        Ok(created)
    }

    async fn list_pods(&self, namespace: &str, filter: &PodFilter) -> Result<Vec<Pod>> {
        let labels = parse_selector(filter.label_selector.as_deref());
        let fields = parse_selector(filter.field_selector.as_deref());

        Ok(self
            .state()
            .pods
            .values()
            .filter(|p| namespace.is_empty() || p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| {
                let pod_labels = p.metadata.labels.clone().unwrap_or_default();
                labels.iter().all(|(k, v)| pod_labels.get(k) == Some(v))
            })
            .filter(|p| fields.iter().all(|(k, v)| field_matches(p, k, v)))
            .cloned()
            .collect())
    }

    async fn get_controller(&self, namespace: &str, name: &str) -> Result<ReplicationController> {
        self.controller(namespace, name)
            .ok_or_else(|| not_found(ObjectKind::ReplicationController, namespace, name))
    }

    async fn update_controller(&self, rc: &ReplicationController) -> Result<ReplicationController> {
        let key = key_of(&rc.metadata);
        let mut state = self.state();
        if !state.controllers.contains_key(&key) {
            return Err(not_found(ObjectKind::ReplicationController, &key.0, &key.1));
        }
        state.controllers.insert(key, rc.clone());
        Ok(rc.clone())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.state().nodes.clone())
    }
}

fn key_of(meta: &ObjectMeta) -> Key {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn not_found(kind: ObjectKind, namespace: &str, name: &str) -> Error {
    Error::NotFound {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn parse_selector(selector: Option<&str>) -> HashMap<String, String> {
    selector
        .unwrap_or_default()
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn field_matches(pod: &Pod, field: &str, value: &str) -> bool {
    match field {
        "status.phase" => pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some(value),
        "spec.nodeName" => pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(value),
        "metadata.name" => pod.metadata.name.as_deref() == Some(value),
        _ => false,
    }
}

fn running() -> PodStatus {
    PodStatus {
        phase: Some("Running".to_string()),
        host_ip: Some("10.0.0.1".to_string()),
        ..Default::default()
    }
}

fn from_template(rc: &ReplicationController, owner: &OwnerReference, uid: &str) -> Pod {
    let template = rc
        .spec
        .as_ref()
        .and_then(|s| s.template.clone())
        .unwrap_or_default();
    let meta = template.metadata.unwrap_or_default();
    Pod {
        metadata: ObjectMeta {
            name: Some(format!("{}-{}", owner.name, uid)),
            namespace: rc.metadata.namespace.clone(),
            uid: Some(uid.to_string()),
            labels: meta.labels,
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        spec: template.spec,
        status: Some(running()),
    }
}

fn node(name: &str, unschedulable: bool) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            unschedulable: Some(unschedulable),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Timeouts collapsed so each wait probes once
pub fn fast_config() -> RelocatorConfig {
    RelocatorConfig {
        namespace: "ns".to_string(),
        gone_timeout_secs: 0,
        settle_timeout_secs: 0,
        poll_interval_ms: 1,
        ..Default::default()
    }
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A running pod bound to `node`
pub fn create_test_pod(namespace: &str, name: &str, node: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("{}-uid", name)),
            resource_version: Some("41".to_string()),
            labels: Some(labels(&[("app", "x")])),
            annotations: Some(labels(&[("team", "infra")])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            hostname: Some(name.to_string()),
            scheduler_name: Some("default-scheduler".to_string()),
            containers: vec![Container {
                name: "main".to_string(),
                image: Some("nginx:1.25".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(running()),
    }
}

/// `create_test_pod` controlled by replication controller `rc`
pub fn create_owned_pod(namespace: &str, name: &str, node: &str, rc: &str) -> Pod {
    let mut pod = create_test_pod(namespace, name, node);
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "v1".to_string(),
        kind: "ReplicationController".to_string(),
        name: rc.to_string(),
        uid: format!("{}-uid", rc),
        controller: Some(true),
        ..Default::default()
    }]);
    pod
}

pub fn create_test_controller(namespace: &str, name: &str, replicas: i32) -> ReplicationController {
    ReplicationController {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ReplicationControllerSpec {
            replicas: Some(replicas),
            selector: Some(labels(&[("app", "x")])),
            template: Some(PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(&[("app", "x")])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    scheduler_name: Some("default-scheduler".to_string()),
                    containers: vec![Container {
                        name: "main".to_string(),
                        image: Some("nginx:1.25".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
