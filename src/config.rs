use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// How to reach the cluster API server.
///
/// At least one of `master_url` and `kubeconfig` must be set. When both are,
/// the kubeconfig wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub master_url: Option<String>,

    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        let blank = |s: &Option<String>| s.as_deref().map(str::is_empty).unwrap_or(true);
        let no_kubeconfig = self
            .kubeconfig
            .as_ref()
            .map(|p| p.as_os_str().is_empty())
            .unwrap_or(true);

        if blank(&self.master_url) && no_kubeconfig {
            return Err(Error::Config(
                "must specify masterUrl or kubeConfig".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tunables for a relocation attempt. Immutable once handed to the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct RelocatorConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_scheduler_name")]
    pub scheduler_name: String,

    /// Grace period for deleting a pod that is about to be recreated
    #[serde(default = "default_delete_grace_seconds")]
    pub delete_grace_seconds: u32,

    /// Grace period for killing the victim replica in a move
    #[serde(default = "default_victim_grace_seconds")]
    pub victim_grace_seconds: u32,

    /// Upper bound on waiting for a deleted pod to disappear
    #[serde(default = "default_gone_timeout_secs")]
    pub gone_timeout_secs: u64,

    /// Upper bound on waiting for a new pod to be scheduled
    #[serde(default = "default_settle_timeout_secs")]
    pub settle_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Where to drop the manifest of a pod before it is deleted
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_scheduler_name() -> String {
    "default-scheduler".to_string()
}

fn default_delete_grace_seconds() -> u32 {
    10
}

fn default_victim_grace_seconds() -> u32 {
    0
}

fn default_gone_timeout_secs() -> u64 {
    35
}

fn default_settle_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl RelocatorConfig {
    /// Load settings from `RELOCATOR_*` environment variables (and `.env`).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("RELOCATOR").try_parsing(true))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }

    pub fn gone_timeout(&self) -> Duration {
        Duration::from_secs(self.gone_timeout_secs)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for RelocatorConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            scheduler_name: default_scheduler_name(),
            delete_grace_seconds: default_delete_grace_seconds(),
            victim_grace_seconds: default_victim_grace_seconds(),
            gone_timeout_secs: default_gone_timeout_secs(),
            settle_timeout_secs: default_settle_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            snapshot_dir: None,
        }
    }
}
