//! Reconciliation metrics.

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use crate::gitops::engine::{ResourceSyncResult, SyncOutcome};

/// Consumes per-cycle outcome counts. Implementations own their locking.
pub trait MetricsSink: Send + Sync {
    /// Updates the per-outcome gauges from one cycle's results.
    fn record(&self, results: &[ResourceSyncResult]);

    /// Counts one failed cycle.
    fn count_error(&self);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _results: &[ResourceSyncResult]) {}

    fn count_error(&self) {}
}

/// Prometheus-backed sink registered on an explicit registry.
#[derive(Debug, Clone)]
pub struct PrometheusMetrics {
    synced: IntGauge,
    sync_failed: IntGauge,
    pruned: IntGauge,
    prune_skipped: IntGauge,
    errors: IntCounter,
}

impl PrometheusMetrics {
    /// Creates the collectors as `<namespace>_<name>` and registers them.
    pub fn new(namespace: &str, registry: &Registry) -> Result<Self, prometheus::Error> {
        let gauge = |name: &str, help: &str| -> Result<IntGauge, prometheus::Error> {
            let gauge = IntGauge::with_opts(Opts::new(name, help).namespace(namespace))?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };

        let synced = gauge("synced", "Resources synced in the last cycle")?;
        let sync_failed = gauge("sync_failed", "Resources that failed to sync in the last cycle")?;
        let pruned = gauge("pruned", "Resources pruned in the last cycle")?;
        let prune_skipped = gauge(
            "prune_skipped",
            "Owned resources left in place because pruning is disabled",
        )?;

        let errors = IntCounter::with_opts(
            Opts::new("errors", "Reconciliation cycles that failed").namespace(namespace),
        )?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            synced,
            sync_failed,
            pruned,
            prune_skipped,
            errors,
        })
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record(&self, results: &[ResourceSyncResult]) {
        let count = |outcome: SyncOutcome| {
            results.iter().filter(|r| r.outcome == outcome).count() as i64
        };
        self.synced.set(count(SyncOutcome::Synced));
        self.sync_failed.set(count(SyncOutcome::SyncFailed));
        self.pruned.set(count(SyncOutcome::Pruned));
        self.prune_skipped.set(count(SyncOutcome::PruneSkipped));
    }

    fn count_error(&self) {
        self.errors.inc();
    }
}

/// Renders the registry in the Prometheus text exposition format.
pub fn render(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
