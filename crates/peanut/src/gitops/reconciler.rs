//! The reconciliation loop: sync → parse → tag → apply/prune → record.
//!
//! Inspired by ArgoCD's controller loop. A single task owns the working copy
//! and the engine; activations come from the trigger queue and are executed
//! strictly one after another. No cycle failure ends the loop, only shutdown.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use super::engine::{
    EngineError, ReconcileRequest, ReconciliationEngine, ResourceSyncResult,
};
use super::error::GitOpsError;
use super::git::CommitId;
use super::ownership::{OwnershipError, OwnershipTagger};
use super::resource::{LiveResource, ResourceIdentity, TaggedManifest};
use super::source::ManifestSource;
use super::sync_scheduler::{LoopEvent, TriggerReceiver};
use crate::history::{ReconciliationRun, SyncHistoryRing};
use crate::metrics::MetricsSink;

/// Settings fixed for the lifetime of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub prune: bool,
    /// Default namespace handed to the engine.
    pub namespace: String,
    pub namespaced: bool,
    pub resync_interval: Duration,
    /// How long an in-flight cycle may run on after shutdown is requested.
    pub shutdown_grace: Duration,
    /// Optional deadline on the engine call.
    pub engine_timeout: Option<Duration>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            prune: true,
            namespace: "default".to_string(),
            namespaced: false,
            resync_interval: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(30),
            engine_timeout: None,
        }
    }
}

/// Observable state of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Idle,
    Running,
    Terminated,
}

/// Why a cycle failed as a whole.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    RepositoryAccess(GitOpsError),

    #[error(transparent)]
    Parse(GitOpsError),

    #[error("Failed to compute ownership signature for {identity}: {source}")]
    Ownership {
        identity: ResourceIdentity,
        #[source]
        source: OwnershipError,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<GitOpsError> for CycleError {
    fn from(err: GitOpsError) -> Self {
        if err.is_repository_access() {
            CycleError::RepositoryAccess(err)
        } else {
            CycleError::Parse(err)
        }
    }
}

/// Drives reconciliation cycles for one repository.
pub struct ReconciliationLoop<S: ManifestSource> {
    source: S,
    tagger: OwnershipTagger,
    engine: Arc<dyn ReconciliationEngine>,
    history: Arc<SyncHistoryRing>,
    metrics: Arc<dyn MetricsSink>,
    config: ReconcilerConfig,
    state: watch::Sender<LoopState>,
}

impl<S: ManifestSource + 'static> ReconciliationLoop<S> {
    /// Creates a loop. The ownership scope is taken from the source's repository.
    pub fn new(
        source: S,
        engine: Arc<dyn ReconciliationEngine>,
        history: Arc<SyncHistoryRing>,
        metrics: Arc<dyn MetricsSink>,
        config: ReconcilerConfig,
    ) -> Self {
        let tagger = OwnershipTagger::new(source.repository());
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            source,
            tagger,
            engine,
            history,
            metrics,
            config,
            state,
        }
    }

    /// Replaces the ownership tagger.
    pub fn with_tagger(mut self, tagger: OwnershipTagger) -> Self {
        self.tagger = tagger;
        self
    }

    /// Subscribes to state changes.
    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Runs until shutdown, then releases the engine.
    pub async fn run(mut self, mut receiver: TriggerReceiver) {
        log::info!(
            "Reconciliation loop started for {} ({}:{})",
            self.source.repository().url,
            self.source.repository().branch,
            self.source.repository().path
        );

        loop {
            match receiver.next().await {
                LoopEvent::Shutdown => break,
                LoopEvent::Activate(activation) => {
                    log::info!(
                        "Reconciliation triggered by {} (requested at {})",
                        activation.source,
                        activation.requested_at.to_rfc3339()
                    );
                    self.state.send_replace(LoopState::Running);
                    self.reconcile_with_grace(&receiver).await;
                    self.state.send_replace(LoopState::Idle);
                }
            }
        }

        receiver.close();
        self.engine.shutdown().await;
        self.state.send_replace(LoopState::Terminated);
        log::info!("Reconciliation loop terminated");
    }

    /// Runs one cycle; if shutdown arrives mid-cycle, allows the grace window
    /// and abandons the cycle after it.
    async fn reconcile_with_grace(&mut self, receiver: &TriggerReceiver) {
        let grace = self.config.shutdown_grace;
        let mut shutdown = receiver.shutdown_signal();

        let cycle = self.reconcile_once();
        tokio::pin!(cycle);

        tokio::select! {
            _ = &mut cycle => return,
            _ = shutdown.wait() => {}
        }

        log::info!(
            "Shutdown requested during reconciliation, waiting up to {}s",
            grace.as_secs()
        );
        match tokio::time::timeout(grace, cycle).await {
            Ok(run) => log::info!(
                "In-flight reconciliation finished at {}",
                run.revision.as_ref().map(CommitId::short).unwrap_or("-")
            ),
            Err(_) => log::warn!(
                "Abandoned in-flight reconciliation after {}s grace period",
                grace.as_secs()
            ),
        }
    }

    /// Runs one full cycle and records it. Never fails: cycle errors are
    /// captured in the returned run.
    pub async fn reconcile_once(&mut self) -> Arc<ReconciliationRun> {
        let start_time = Utc::now();
        let outcome = self.run_cycle().await;
        let end_time = Utc::now();

        let run = match outcome {
            Ok((head, results)) => {
                self.metrics.record(&results);
                log::info!(
                    "Reconciled {} in {}ms: {} resources",
                    head.short(),
                    (end_time - start_time).num_milliseconds(),
                    results.len()
                );
                if !results.is_empty() {
                    log::info!("\n{}", format_results_table(&results));
                }
                ReconciliationRun {
                    start_time,
                    end_time,
                    revision: Some(head),
                    error: None,
                    results,
                }
            }
            Err(e) => {
                self.metrics.count_error();
                log::error!("Reconciliation failed: {}", e);
                ReconciliationRun {
                    start_time,
                    end_time,
                    revision: self.source.current_head().cloned(),
                    error: Some(e.to_string()),
                    results: Vec::new(),
                }
            }
        };

        self.history.record(run)
    }

    async fn run_cycle(&mut self) -> Result<(CommitId, Vec<ResourceSyncResult>), CycleError> {
        // Idempotent: an unchanged head is re-applied to correct drift
        let head = self
            .source
            .sync()
            .await
            .map_err(CycleError::RepositoryAccess)?;

        let manifests = self.source.extract_manifests().await?;
        let targets = manifests
            .into_iter()
            .map(|manifest| {
                let identity = manifest.identity();
                self.tagger
                    .tag_manifest(manifest)
                    .map_err(|source| CycleError::Ownership { identity, source })
            })
            .collect::<Result<Vec<TaggedManifest>, _>>()?;
        log::debug!("Tagged {} manifests at {}", targets.len(), head.short());

        let tagger = &self.tagger;
        let is_owned =
            move |live: &LiveResource| tagger.is_owned(live.ownership.as_ref(), &live.identity);
        let request = ReconcileRequest {
            targets: &targets,
            is_owned: &is_owned,
            revision: head.as_str(),
            namespace: &self.config.namespace,
            namespaced: self.config.namespaced,
            prune: self.config.prune,
        };

        let call = self.engine.reconcile(request);
        let results = match self.config.engine_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| EngineError::Timeout(limit.as_secs()))??,
            None => call.await?,
        };

        Ok((head, results))
    }
}

/// Renders results as a two-column RESOURCE / RESULT table.
pub fn format_results_table(results: &[ResourceSyncResult]) -> String {
    let rows: Vec<(String, String)> = results
        .iter()
        .map(|r| {
            let result = if r.message.is_empty() {
                r.outcome.to_string()
            } else {
                format!("{} ({})", r.outcome, r.message.replace('\n', " "))
            };
            (r.identity.to_string(), result)
        })
        .collect();

    let width = rows
        .iter()
        .map(|(resource, _)| resource.len())
        .max()
        .unwrap_or(0)
        .max("RESOURCE".len());

    let mut table = format!("{:<width$}  RESULT", "RESOURCE", width = width);
    for (resource, result) in rows {
        let _ = write!(table, "\n{:<width$}  {}", resource, result, width = width);
    }
    table
}
