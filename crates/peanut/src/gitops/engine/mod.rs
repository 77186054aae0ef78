//! The reconciliation engine boundary.
//!
//! The loop hands the engine a set of tagged targets together with an
//! ownership predicate; the engine applies targets, decides what to prune and
//! reports one result per resource it touched or considered.

mod kubectl;

pub use kubectl::{parse_api_resources, ApiResource, KubeClient, KubectlEngine};

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::resource::{LiveResource, ResourceIdentity, TaggedManifest};

/// Per-resource outcome of a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncOutcome {
    Synced,
    SyncFailed,
    Pruned,
    PruneSkipped,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Synced => "Synced",
            SyncOutcome::SyncFailed => "SyncFailed",
            SyncOutcome::Pruned => "Pruned",
            SyncOutcome::PruneSkipped => "PruneSkipped",
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result for one resource.
///
/// Serializes flat: `{group, kind, namespace, name, status, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSyncResult {
    #[serde(flatten)]
    pub identity: ResourceIdentity,
    #[serde(rename = "status")]
    pub outcome: SyncOutcome,
    pub message: String,
}

impl ResourceSyncResult {
    pub fn new(identity: ResourceIdentity, outcome: SyncOutcome, message: impl Into<String>) -> Self {
        Self {
            identity,
            outcome,
            message: message.into(),
        }
    }
}

/// Decides whether a live resource was created by this agent.
pub type OwnershipPredicate<'a> = &'a (dyn Fn(&LiveResource) -> bool + Send + Sync);

/// Everything the engine needs for one cycle.
pub struct ReconcileRequest<'a> {
    /// Desired state, already annotated with ownership signatures.
    pub targets: &'a [TaggedManifest],
    /// Prune guard for live resources without a matching target.
    pub is_owned: OwnershipPredicate<'a>,
    /// Source commit of the targets.
    pub revision: &'a str,
    /// Default namespace for targets that do not name one.
    pub namespace: &'a str,
    /// Restrict management to `namespace`.
    pub namespaced: bool,
    pub prune: bool,
}

impl fmt::Debug for ReconcileRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileRequest")
            .field("targets", &self.targets.len())
            .field("revision", &self.revision)
            .field("namespace", &self.namespace)
            .field("namespaced", &self.namespaced)
            .field("prune", &self.prune)
            .finish()
    }
}

/// A failure of the reconciliation call as a whole.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Cluster unavailable: {0}")]
    Unavailable(String),

    #[error("Resource discovery failed: {0}")]
    Discovery(String),

    #[error("Reconciliation did not finish within {0}s")]
    Timeout(u64),

    #[error("Engine has been shut down")]
    Shutdown,
}

/// Applies desired state to a cluster and prunes owned leftovers.
#[async_trait]
pub trait ReconciliationEngine: Send + Sync {
    /// Runs one reconciliation. Per-resource failures are reported in the
    /// returned results; only call-level failures are errors.
    async fn reconcile(
        &self,
        request: ReconcileRequest<'_>,
    ) -> Result<Vec<ResourceSyncResult>, EngineError>;

    /// Releases background resources. Called once when the loop terminates.
    async fn shutdown(&self) {}
}
