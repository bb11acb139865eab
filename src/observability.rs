use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Pipeline dispatch and broadcast counters
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub dispatched: AtomicU64,
    pub short_circuited: AtomicU64,
    pub unavailable: AtomicU64,
    pub retries: AtomicU64,
    pub stage_errors: AtomicU64,
    pub snapshots_delivered: AtomicU64,
    pub snapshots_undelivered: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// A trigger that stopped at a guard instead of dispatching
    pub fn record_short_circuit(&self) {
        self.short_circuited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unavailable(&self) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stage_error(&self) {
        self.stage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, receivers: usize) {
        self.snapshots_delivered
            .fetch_add(receivers as u64, Ordering::Relaxed);
    }

    pub fn record_undelivered(&self) {
        self.snapshots_undelivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> PipelineStats {
        PipelineStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            stage_errors: self.stage_errors.load(Ordering::Relaxed),
            snapshots_delivered: self.snapshots_delivered.load(Ordering::Relaxed),
            snapshots_undelivered: self.snapshots_undelivered.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Pipeline metrics: dispatched={}, short_circuited={}, unavailable={}, retries={}, stage_errors={}, delivered={}, undelivered={}",
            stats.dispatched,
            stats.short_circuited,
            stats.unavailable,
            stats.retries,
            stats.stage_errors,
            stats.snapshots_delivered,
            stats.snapshots_undelivered
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub dispatched: u64,
    pub short_circuited: u64,
    pub unavailable: u64,
    pub retries: u64,
    pub stage_errors: u64,
    pub snapshots_delivered: u64,
    pub snapshots_undelivered: u64,
}

/// Global metrics instance
static PIPELINE_METRICS: std::sync::LazyLock<PipelineMetrics> =
    std::sync::LazyLock::new(PipelineMetrics::new);

pub fn pipeline_metrics() -> &'static PipelineMetrics {
    &PIPELINE_METRICS
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
