pub mod api;
pub mod config;
pub mod error;
pub mod gitops;
pub mod history;
pub mod metrics;
pub mod secrets;

pub use api::{router, serve, ApiState};
pub use config::{load_config, AgentConfig};
pub use error::{ConfigError, PeanutError, Result};
pub use gitops::{
    GitOpsError, ReconcilerConfig, ReconciliationLoop, RepositoryRef, RepositoryTracker,
};
pub use history::{ReconciliationRun, SyncHistoryRing};
pub use metrics::{MetricsSink, PrometheusMetrics};
pub use secrets::{resolve_secret, SecretError};
