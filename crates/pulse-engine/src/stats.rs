//! Engine self-accounting
//!
//! Plain relaxed atomics bumped on the hot path; a snapshot is taken on
//! demand for the query surface and the Prometheus endpoint.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters the engine maintains about itself
#[derive(Debug, Default)]
pub struct EngineStats {
    pub spans_started: AtomicU64,
    pub spans_finished: AtomicU64,
    /// Spans refused because the active registry was full
    pub spans_dropped: AtomicU64,
    /// Spans force-closed by the staleness sweep
    pub spans_abandoned: AtomicU64,
    pub traces_retained_full: AtomicU64,
    pub traces_retained_aggregate: AtomicU64,
    pub metric_samples_recorded: AtomicU64,
    pub logs_recorded: AtomicU64,
    pub alerts_emitted: AtomicU64,
    /// Panics caught at the facade boundary
    pub guard_trips: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            spans_started: self.spans_started.load(Ordering::Relaxed),
            spans_finished: self.spans_finished.load(Ordering::Relaxed),
            spans_dropped: self.spans_dropped.load(Ordering::Relaxed),
            spans_abandoned: self.spans_abandoned.load(Ordering::Relaxed),
            traces_retained_full: self.traces_retained_full.load(Ordering::Relaxed),
            traces_retained_aggregate: self.traces_retained_aggregate.load(Ordering::Relaxed),
            metric_samples_recorded: self.metric_samples_recorded.load(Ordering::Relaxed),
            logs_recorded: self.logs_recorded.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            guard_trips: self.guard_trips.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`EngineStats`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatsSnapshot {
    pub spans_started: u64,
    pub spans_finished: u64,
    pub spans_dropped: u64,
    pub spans_abandoned: u64,
    pub traces_retained_full: u64,
    pub traces_retained_aggregate: u64,
    pub metric_samples_recorded: u64,
    pub logs_recorded: u64,
    pub alerts_emitted: u64,
    pub guard_trips: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = EngineStats::new();
        stats.spans_started.fetch_add(3, Ordering::Relaxed);
        stats.guard_trips.fetch_add(1, Ordering::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.spans_started, 3);
        assert_eq!(snap.guard_trips, 1);
        assert_eq!(snap.spans_finished, 0);
    }
}
