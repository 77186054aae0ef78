//! Agent configuration schema.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::gitops::git::RepositoryRef;
use crate::gitops::parser::ParserKind;
use crate::gitops::reconciler::ReconcilerConfig;
use crate::history::DEFAULT_HISTORY_SIZE;

/// Namespace used when neither config nor cluster context names one.
pub const FALLBACK_NAMESPACE: &str = "default";

/// Everything the host needs to start an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Repository, branch and path to deploy.
    #[serde(default)]
    pub repository: RepositoryRef,

    /// Manifest parser: kustomize or manifest.
    #[serde(default)]
    pub parser: ParserKind,

    /// Resync interval in seconds.
    #[serde(default = "default_resync_interval")]
    pub resync_interval: u64,

    /// Delete owned resources that left the repository.
    #[serde(default = "default_true")]
    pub prune: bool,

    /// Default namespace; resolved from the cluster context when empty.
    #[serde(default)]
    pub namespace: String,

    /// Only manage resources inside `namespace`.
    #[serde(default)]
    pub namespaced: bool,

    /// HTTP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Working copy location. A temporary directory is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,

    /// Number of runs kept for the history endpoints.
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_git_timeout")]
    pub git_timeout_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_timeout_secs: Option<u64>,

    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    #[serde(default = "default_kustomize")]
    pub kustomize: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn default_resync_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8080
}

fn default_history_size() -> usize {
    DEFAULT_HISTORY_SIZE
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_git_timeout() -> u64 {
    120
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_kustomize() -> String {
    "kustomize".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            repository: RepositoryRef::default(),
            parser: ParserKind::default(),
            resync_interval: default_resync_interval(),
            prune: true,
            namespace: String::new(),
            namespaced: false,
            port: default_port(),
            work_dir: None,
            history_size: default_history_size(),
            shutdown_grace_secs: default_shutdown_grace(),
            git_timeout_secs: default_git_timeout(),
            engine_timeout_secs: None,
            kubectl: default_kubectl(),
            kustomize: default_kustomize(),
            kubeconfig: None,
            context: None,
        }
    }
}

impl AgentConfig {
    /// Validates the final configuration. See [`validate_config`](super::validate_config).
    pub fn validate(&self) -> Result<(), ConfigError> {
        super::loader::validate_config(self)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    /// Loop settings, with the namespace already resolved by the host.
    pub fn reconciler_config(&self, namespace: impl Into<String>) -> ReconcilerConfig {
        ReconcilerConfig {
            prune: self.prune,
            namespace: namespace.into(),
            namespaced: self.namespaced,
            resync_interval: self.resync_interval(),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            engine_timeout: self.engine_timeout_secs.map(Duration::from_secs),
        }
    }
}
