//! Bounded history of sealed reconciliation runs.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::gitops::engine::{ResourceSyncResult, SyncOutcome};
use crate::gitops::git::CommitId;

/// Default number of retained runs.
pub const DEFAULT_HISTORY_SIZE: usize = 5;

/// One sealed reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRun {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Source commit; the last known head when the cycle failed early.
    #[serde(rename = "sha")]
    pub revision: Option<CommitId>,
    /// Cycle-level failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub results: Vec<ResourceSyncResult>,
}

impl ReconciliationRun {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Counts results with the given outcome.
    pub fn count(&self, outcome: SyncOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }
}

/// Fixed-capacity ring of runs, oldest evicted first.
///
/// Written only by the loop; read concurrently by request handlers. Runs are
/// shared as `Arc`s so readers never hold the lock while serializing.
#[derive(Debug)]
pub struct SyncHistoryRing {
    capacity: usize,
    runs: RwLock<VecDeque<Arc<ReconciliationRun>>>,
}

impl Default for SyncHistoryRing {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl SyncHistoryRing {
    /// Creates a ring. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            runs: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<Arc<ReconciliationRun>>> {
        match self.runs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("History lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<Arc<ReconciliationRun>>> {
        match self.runs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("History lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Appends a sealed run, evicting the oldest once full.
    pub fn record(&self, run: ReconciliationRun) -> Arc<ReconciliationRun> {
        let run = Arc::new(run);
        let mut runs = self.write();
        while runs.len() >= self.capacity {
            runs.pop_front();
        }
        runs.push_back(Arc::clone(&run));
        run
    }

    /// The most recently sealed run, or `None` before the first one.
    pub fn latest(&self) -> Option<Arc<ReconciliationRun>> {
        self.read().back().cloned()
    }

    /// All retained runs, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<ReconciliationRun>> {
        self.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitops::resource::ResourceIdentity;
    use proptest::prelude::*;

    fn run(sha: &str) -> ReconciliationRun {
        let now = Utc::now();
        ReconciliationRun {
            start_time: now,
            end_time: now,
            revision: Some(CommitId::new(sha)),
            error: None,
            results: Vec::new(),
        }
    }

    fn shas(ring: &SyncHistoryRing) -> Vec<String> {
        ring.snapshot()
            .iter()
            .map(|r| r.revision.as_ref().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_empty_ring_has_no_latest() {
        let ring = SyncHistoryRing::default();
        assert!(ring.latest().is_none());
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 5);
    }

    #[test]
    fn test_oldest_is_evicted() {
        let ring = SyncHistoryRing::new(5);
        for sha in ["a", "b", "c", "d", "e", "f"] {
            ring.record(run(sha));
        }
        assert_eq!(ring.latest().unwrap().revision, Some(CommitId::new("f")));
        assert_eq!(shas(&ring), vec!["b", "c", "d", "e", "f"]);
    }

    #[test]
    fn test_zero_capacity_keeps_latest() {
        let ring = SyncHistoryRing::new(0);
        ring.record(run("a"));
        ring.record(run("b"));
        assert_eq!(shas(&ring), vec!["b"]);
    }

    #[test]
    fn test_run_json_shape() {
        let mut failed = run("abc");
        failed.results.push(ResourceSyncResult {
            identity: ResourceIdentity::new("", "ConfigMap", "default", "cfg"),
            outcome: SyncOutcome::SyncFailed,
            message: "denied".to_string(),
        });
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["sha"], "abc");
        assert!(value.get("error").is_none());
        assert!(value.get("startTime").is_some());
        assert_eq!(value["results"][0]["status"], "SyncFailed");
        assert_eq!(failed.count(SyncOutcome::SyncFailed), 1);

        failed.error = Some("sync failed".to_string());
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["error"], "sync failed");
        assert!(!failed.is_success());
    }

    #[test]
    fn test_concurrent_readers_see_sealed_runs() {
        let ring = Arc::new(SyncHistoryRing::new(3));
        let writer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for i in 0..200 {
                    ring.record(run(&format!("{:03}", i)));
                }
            })
        };
        for _ in 0..200 {
            assert!(ring.len() <= 3);
            if let Some(latest) = ring.latest() {
                assert!(latest.revision.is_some());
            }
        }
        writer.join().unwrap();
        assert_eq!(shas(&ring), vec!["197", "198", "199"]);
    }

    proptest! {
        #[test]
        fn prop_ring_keeps_most_recent(capacity in 1usize..8, extra in 1usize..12) {
            let ring = SyncHistoryRing::new(capacity);
            let total = capacity + extra;
            for i in 0..total {
                ring.record(run(&i.to_string()));
            }
            let expected: Vec<String> = (extra..total).map(|i| i.to_string()).collect();
            prop_assert_eq!(shas(&ring), expected);
            prop_assert_eq!(
                ring.latest().unwrap().revision.clone(),
                Some(CommitId::new((total - 1).to_string()))
            );
        }
    }
}
