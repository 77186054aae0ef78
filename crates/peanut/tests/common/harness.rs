//! Test doubles for driving the reconciliation loop without git or a cluster.
//!
//! - `FakeSource` replays scripted sync outcomes over a fixed manifest set
//! - `GatedEngine` counts calls, tracks overlap and can hold calls open
//! - `RecordingMetrics` counts what the loop reports

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};

use peanut::gitops::engine::{
    EngineError, ReconcileRequest, ReconciliationEngine, ResourceSyncResult, SyncOutcome,
};
use peanut::gitops::{
    CommitId, GitOpsError, Manifest, ManifestSource, ReconcilerConfig, ReconciliationLoop,
    RepositoryRef,
};
use peanut::history::SyncHistoryRing;
use peanut::metrics::MetricsSink;

use super::builders::commit;

/// Manifest source with scripted sync results.
///
/// Once the script runs out every sync succeeds at `commit(1)`.
pub struct FakeSource {
    repo: RepositoryRef,
    head: Option<CommitId>,
    script: VecDeque<Result<CommitId, GitOpsError>>,
    manifests: Vec<Manifest>,
}

impl FakeSource {
    pub fn new(manifests: Vec<Manifest>) -> Self {
        Self {
            repo: RepositoryRef::new("https://git.example.com/platform/config.git", "main", "deploy"),
            head: None,
            script: VecDeque::new(),
            manifests,
        }
    }

    /// Queues the outcome of the next sync.
    pub fn then(mut self, outcome: Result<CommitId, GitOpsError>) -> Self {
        self.script.push_back(outcome);
        self
    }
}

#[async_trait]
impl ManifestSource for FakeSource {
    fn repository(&self) -> &RepositoryRef {
        &self.repo
    }

    fn current_head(&self) -> Option<&CommitId> {
        self.head.as_ref()
    }

    async fn sync(&mut self) -> peanut::gitops::Result<CommitId> {
        let head = self.script.pop_front().unwrap_or_else(|| Ok(commit(1)))?;
        self.head = Some(head.clone());
        Ok(head)
    }

    async fn extract_manifests(&self) -> peanut::gitops::Result<Vec<Manifest>> {
        Ok(self.manifests.clone())
    }
}

/// Engine that reports every target as synced.
///
/// A gated engine blocks each call until [`GatedEngine::release`] hands it a
/// permit; an open one only waits for its delay.
pub struct GatedEngine {
    gate: Option<Semaphore>,
    delay: Duration,
    calls: watch::Sender<usize>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl GatedEngine {
    fn build(gate: Option<Semaphore>, delay: Duration) -> Arc<Self> {
        let (calls, _) = watch::channel(0);
        Arc::new(Self {
            gate,
            delay,
            calls,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        })
    }

    pub fn open(delay: Duration) -> Arc<Self> {
        Self::build(None, delay)
    }

    pub fn gated() -> Arc<Self> {
        Self::build(Some(Semaphore::new(0)), Duration::ZERO)
    }

    /// Lets `n` blocked or future calls finish.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.borrow()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Waits until the engine has been entered `n` times.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut calls = self.calls.subscribe();
        let entered = tokio::time::timeout(Duration::from_secs(300), async {
            let _ = calls.wait_for(|c| *c >= n).await;
        })
        .await;
        assert!(entered.is_ok(), "engine was entered {} times, expected {}", self.calls(), n);
    }
}

#[async_trait]
impl ReconciliationEngine for GatedEngine {
    async fn reconcile(
        &self,
        request: ReconcileRequest<'_>,
    ) -> Result<Vec<ResourceSyncResult>, EngineError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.calls.send_modify(|c| *c += 1);

        let results: Vec<ResourceSyncResult> = request
            .targets
            .iter()
            .map(|t| {
                ResourceSyncResult::new(
                    t.identity.with_default_namespace(request.namespace),
                    SyncOutcome::Synced,
                    "",
                )
            })
            .collect();

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(results)
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts metric updates.
#[derive(Default)]
pub struct RecordingMetrics {
    pub recorded: AtomicUsize,
    pub errors: AtomicUsize,
}

impl MetricsSink for RecordingMetrics {
    fn record(&self, _results: &[ResourceSyncResult]) {
        self.recorded.fetch_add(1, Ordering::SeqCst);
    }

    fn count_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

/// A loop wired to test doubles, plus handles on what it writes.
pub struct LoopFixture {
    pub reconciler: ReconciliationLoop<FakeSource>,
    pub history: Arc<SyncHistoryRing>,
    pub metrics: Arc<RecordingMetrics>,
}

pub fn build_loop(
    source: FakeSource,
    engine: Arc<GatedEngine>,
    config: ReconcilerConfig,
) -> LoopFixture {
    let history = Arc::new(SyncHistoryRing::new(100));
    let metrics = Arc::new(RecordingMetrics::default());
    let reconciler = ReconciliationLoop::new(
        source,
        engine,
        Arc::clone(&history),
        Arc::clone(&metrics) as Arc<dyn MetricsSink>,
        config,
    );
    LoopFixture {
        reconciler,
        history,
        metrics,
    }
}

/// Polls until the history holds at least `n` runs.
pub async fn wait_for_runs(history: &SyncHistoryRing, n: usize) {
    let sealed = tokio::time::timeout(Duration::from_secs(300), async {
        while history.len() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(sealed.is_ok(), "history has {} runs, expected {}", history.len(), n);
}
