//! Command-line flags for the agent.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use peanut::config::AgentConfig;
use peanut::gitops::ParserKind;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// peanut-engine - pull-based GitOps agent
#[derive(Parser, Debug)]
#[command(name = "peanut-engine")]
#[command(version)]
#[command(about = "Keeps a Kubernetes cluster in sync with a path in a git repository")]
pub struct Cli {
    /// YAML configuration file; flags override its values
    #[arg(short, long, env = "PEANUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Git repository URL
    #[arg(long, env = "REPO_URL")]
    pub repo_url: Option<String>,

    /// Branch to track
    #[arg(long, env = "REPO_BRANCH")]
    pub branch: Option<String>,

    /// Directory within the repository holding the manifests
    #[arg(long, env = "REPO_PATH")]
    pub path: Option<String>,

    /// Manifest parser (kustomize or manifest)
    #[arg(long, env = "PARSER")]
    pub parser: Option<ParserKind>,

    /// Resync interval in seconds
    #[arg(long, env = "RESYNC_INTERVAL")]
    pub resync: Option<u64>,

    /// HTTP port
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Delete owned resources that left the repository
    #[arg(long, env = "PRUNE")]
    pub prune: Option<bool>,

    /// Only manage resources in the default namespace
    #[arg(long, env = "NAMESPACED")]
    pub namespaced: Option<bool>,

    /// Default namespace for resources that do not name one
    #[arg(long, env = "DEFAULT_NAMESPACE")]
    pub default_namespace: Option<String>,

    /// Working copy location (a temporary directory when unset)
    #[arg(long, env = "WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// kubectl binary
    #[arg(long, env = "KUBECTL")]
    pub kubectl: Option<String>,

    /// kustomize binary
    #[arg(long, env = "KUSTOMIZE")]
    pub kustomize: Option<String>,

    /// kubeconfig file passed to kubectl
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// kubeconfig context passed to kubectl
    #[arg(long, env = "KUBE_CONTEXT")]
    pub context: Option<String>,

    /// Log output format
    #[arg(long, value_enum, env = "LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Overrides config values with the flags that were given.
    pub fn apply_to(&self, config: &mut AgentConfig) {
        if let Some(url) = &self.repo_url {
            config.repository.url = url.clone();
        }
        if let Some(branch) = &self.branch {
            config.repository.branch = branch.clone();
        }
        if let Some(path) = &self.path {
            config.repository.path = path.clone();
        }
        if let Some(parser) = self.parser {
            config.parser = parser;
        }
        if let Some(resync) = self.resync {
            config.resync_interval = resync;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(prune) = self.prune {
            config.prune = prune;
        }
        if let Some(namespaced) = self.namespaced {
            config.namespaced = namespaced;
        }
        if let Some(namespace) = &self.default_namespace {
            config.namespace = namespace.clone();
        }
        if let Some(work_dir) = &self.work_dir {
            config.work_dir = Some(work_dir.clone());
        }
        if let Some(kubectl) = &self.kubectl {
            config.kubectl = kubectl.clone();
        }
        if let Some(kustomize) = &self.kustomize {
            config.kustomize = kustomize.clone();
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            config.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(context) = &self.context {
            config.context = Some(context.clone());
        }
    }
}
