//! Pod projection for delete-and-recreate
//!
//! A projection keeps what identifies a pod and what it runs, and drops what
//! the API server assigns or what ties the pod to its current placement.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Build a new pod, suitable for `create`, from a snapshot of an existing one.
///
/// Preserved: name, namespace, generateName, labels, annotations, owner
/// references, finalizers and the pod spec.
/// Cleared: `spec.nodeName`, `spec.hostname`, `spec.subdomain`, uid,
/// resourceVersion, selfLink, generation, managed fields, creation and
/// deletion timestamps, deletion grace period, and the status.
pub fn project(source: &Pod) -> Pod {
    let meta = &source.metadata;

    let spec = source.spec.clone().map(|mut spec| {
        spec.node_name = None;
        spec.hostname = None;
        spec.subdomain = None;
        spec
    });

    Pod {
        metadata: ObjectMeta {
            name: meta.name.clone(),
            namespace: meta.namespace.clone(),
            generate_name: meta.generate_name.clone(),
            labels: meta.labels.clone(),
            annotations: meta.annotations.clone(),
            owner_references: meta.owner_references.clone(),
            finalizers: meta.finalizers.clone(),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// Bind the pod to `node` directly. The scheduler is bypassed.
pub fn pin_to_node(mut pod: Pod, node: &str) -> Pod {
    pod.spec.get_or_insert_with(Default::default).node_name = Some(node.to_string());
    pod
}

/// Hand the pod to the scheduler named `scheduler`
pub fn with_scheduler(mut pod: Pod, scheduler: &str) -> Pod {
    pod.spec.get_or_insert_with(Default::default).scheduler_name = Some(scheduler.to_string());
    pod
}
