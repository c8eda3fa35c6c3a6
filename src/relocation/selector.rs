//! Label selector strings for a controller's pods

use k8s_openapi::api::core::v1::ReplicationController;

use crate::error::{Error, Result};

/// Field selector for pods the kubelet reports as running
pub const RUNNING_PHASE_SELECTOR: &str = "status.phase=Running";

/// Serialize a label map as `k1=v1,k2=v2`, pairs sorted lexicographically so
/// the same set always yields the same string.
pub fn label_selector<'a, I>(labels: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut pairs: Vec<String> = labels
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    pairs.sort();
    pairs.join(",")
}

/// Selector matching the pods a controller owns.
///
/// Falls back to the template labels when `spec.selector` is unset, the same
/// defaulting the API server applies. An empty result is rejected since it
/// would match every pod in the namespace.
pub fn controller_selector(rc: &ReplicationController) -> Result<String> {
    let spec = rc.spec.as_ref();

    let selector = spec
        .and_then(|s| s.selector.as_ref())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            spec.and_then(|s| s.template.as_ref())
                .and_then(|t| t.metadata.as_ref())
                .and_then(|m| m.labels.as_ref())
        })
        .map(|labels| label_selector(labels))
        .unwrap_or_default();

    if selector.is_empty() {
        return Err(Error::InvalidIntent(format!(
            "replicationcontroller {} has no selector",
            rc.metadata.name.as_deref().unwrap_or("unknown")
        )));
    }
    Ok(selector)
}
