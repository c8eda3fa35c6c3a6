//! Kubernetes client wrapper for pod relocation

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, ReplicationController};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::config::ConnectionConfig;
use crate::error::{Error, ObjectKind, Result, Step};

/// Server-side filters for listing pods
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodFilter {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl PodFilter {
    pub fn labels(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    pub fn fields(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    fn to_list_params(&self) -> ListParams {
        let mut params = ListParams::default();
        if let Some(labels) = &self.label_selector {
            params = params.labels(labels);
        }
        if let Some(fields) = &self.field_selector {
            params = params.fields(fields);
        }
        params
    }
}

/// The cluster operations relocation needs.
///
/// Every call is a single request: implementations must not retry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    /// Replace a pod. The API server only accepts changes to a narrow set of
    /// fields (image, activeDeadlineSeconds, added tolerations).
    async fn update_pod(&self, pod: &Pod) -> Result<Pod>;

    async fn delete_pod(&self, namespace: &str, name: &str, grace_period_seconds: u32)
        -> Result<()>;

    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;

    /// List pods in `namespace`; an empty namespace lists every namespace.
    async fn list_pods(&self, namespace: &str, filter: &PodFilter) -> Result<Vec<Pod>>;

    async fn get_controller(&self, namespace: &str, name: &str) -> Result<ReplicationController>;

    async fn update_controller(&self, rc: &ReplicationController) -> Result<ReplicationController>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;
}

/// Wrapper around kube::Client implementing [`ClusterApi`]
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Connect using an explicit kubeconfig file or master URL.
    #[instrument(skip_all)]
    pub async fn connect(conn: &ConnectionConfig) -> Result<Self> {
        conn.validate()?;

        let config = match (&conn.kubeconfig, &conn.master_url) {
            (Some(path), _) if !path.as_os_str().is_empty() => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::Config(e.to_string()))?
            }
            (_, Some(url)) => {
                let uri = url
                    .parse()
                    .map_err(|e| Error::Config(format!("invalid masterUrl {}: {}", url, e)))?;
                Config::new(uri)
            }
            _ => {
                return Err(Error::Config(
                    "must specify masterUrl or kubeConfig".to_string(),
                ))
            }
        };

        let client = Client::try_from(config).map_err(|e| Error::Config(e.to_string()))?;
        info!("Connected to Kubernetes cluster");

        Ok(Self { client })
    }

    /// Get the inner kube Client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }

    fn controllers(&self, namespace: &str) -> Api<ReplicationController> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn identity(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> (&str, &str) {
    (
        meta.namespace.as_deref().unwrap_or("default"),
        meta.name.as_deref().unwrap_or_default(),
    )
}

#[async_trait]
impl ClusterApi for K8sClient {
    #[instrument(skip(self))]
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.pods(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(Step::GetPod, ObjectKind::Pod, namespace, name, e))
    }

    #[instrument(skip(self, pod), fields(pod_name = %pod.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn update_pod(&self, pod: &Pod) -> Result<Pod> {
        let (namespace, name) = identity(&pod.metadata);
        let updated = self
            .pods(namespace)
            .replace(name, &PostParams::default(), pod)
            .await
            .map_err(|e| Error::from_kube(Step::UpdatePod, ObjectKind::Pod, namespace, name, e))?;
        info!("Updated pod");
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u32,
    ) -> Result<()> {
        let params = DeleteParams {
            grace_period_seconds: Some(grace_period_seconds),
            ..DeleteParams::default()
        };
        self.pods(namespace)
            .delete(name, &params)
            .await
            .map_err(|e| Error::from_kube(Step::DeletePod, ObjectKind::Pod, namespace, name, e))?;
        info!(name, "Deleted pod");
        Ok(())
    }

    #[instrument(skip(self, pod), fields(pod_name = %pod.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let (namespace, name) = identity(&pod.metadata);
        let created = self
            .pods(namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| Error::from_kube(Step::CreatePod, ObjectKind::Pod, namespace, name, e))?;
        info!("Created pod");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn list_pods(&self, namespace: &str, filter: &PodFilter) -> Result<Vec<Pod>> {
        let list = self
            .pods(namespace)
            .list(&filter.to_list_params())
            .await
            .map_err(|e| Error::from_kube(Step::ListPods, ObjectKind::Pod, namespace, "", e))?;
        debug!(count = list.items.len(), "Listed pods");
        Ok(list.items)
    }

    #[instrument(skip(self))]
    async fn get_controller(&self, namespace: &str, name: &str) -> Result<ReplicationController> {
        self.controllers(namespace).get(name).await.map_err(|e| {
            Error::from_kube(
                Step::GetController,
                ObjectKind::ReplicationController,
                namespace,
                name,
                e,
            )
        })
    }

    #[instrument(skip(self, rc), fields(rc_name = %rc.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn update_controller(&self, rc: &ReplicationController) -> Result<ReplicationController> {
        let (namespace, name) = identity(&rc.metadata);
        let updated = self
            .controllers(namespace)
            .replace(name, &PostParams::default(), rc)
            .await
            .map_err(|e| {
                Error::from_kube(
                    Step::UpdateController,
                    ObjectKind::ReplicationController,
                    namespace,
                    name,
                    e,
                )
            })?;
        info!("Updated replication controller");
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from_kube(Step::ListNodes, ObjectKind::Node, "", "", e))?;
        info!("There are {} nodes", list.items.len());
        Ok(list.items)
    }
}
