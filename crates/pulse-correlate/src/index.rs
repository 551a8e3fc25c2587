//! Correlation index - bounded storage keyed by trace id
//!
//! Three fixed-size ring buffers (traces, metric samples, log entries)
//! plus a side index mapping trace_id to the sequence numbers of its
//! correlated samples and logs. Insertion past capacity evicts the oldest
//! entry and never blocks. Side-index entries whose ring slot has been
//! evicted are pruned lazily on the next lookup, keeping insertion O(1)
//! amortized.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pulse_core::ids::TraceId;
use pulse_core::record::{CorrelatedLogEntry, MetricSample};
use pulse_core::trace::{RetainedTrace, TraceSummary};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// A ring of (sequence, entry) pairs with O(1) lookup by sequence
///
/// Sequence numbers are monotonic, so live entries occupy the contiguous
/// range `[front_seq, front_seq + len)` and lookup is an offset.
struct SeqRing<T> {
    ring: VecDeque<T>,
    capacity: usize,
    next_seq: u64,
}

impl<T> SeqRing<T> {
    fn new(capacity: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    fn push(&mut self, entry: T) -> u64 {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(entry);
        self.next_seq += 1;
        self.next_seq - 1
    }

    fn front_seq(&self) -> u64 {
        self.next_seq - self.ring.len() as u64
    }

    fn get(&self, seq: u64) -> Option<&T> {
        if seq >= self.next_seq || seq < self.front_seq() {
            return None;
        }
        self.ring.get((seq - self.front_seq()) as usize)
    }

    fn len(&self) -> usize {
        self.ring.len()
    }
}

/// Side-index entry: which ring sequences belong to one trace
#[derive(Default)]
struct TraceRefs {
    log_seqs: VecDeque<u64>,
    metric_seqs: VecDeque<u64>,
}

struct TraceStore {
    order: VecDeque<TraceId>,
    by_id: HashMap<TraceId, RetainedTrace>,
    capacity: usize,
}

impl TraceStore {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            by_id: HashMap::new(),
            capacity,
        }
    }

    /// Insert, evicting the oldest trace past capacity
    ///
    /// Returns the evicted trace id, if any.
    fn push(&mut self, trace: RetainedTrace) -> Option<TraceId> {
        let id = trace.trace_id();
        if self.by_id.insert(id, trace).is_none() {
            self.order.push_back(id);
        }
        if self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.by_id.remove(&old);
                return Some(old);
            }
        }
        None
    }
}

/// Everything known about one trace id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedView {
    pub trace: Option<RetainedTrace>,
    pub logs: Vec<CorrelatedLogEntry>,
    pub metrics: Vec<MetricSample>,
}

/// Search filter for the query surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceFilter {
    /// Only traces rooted in this service
    pub service: Option<String>,

    /// Only traces containing an error
    pub error_only: bool,

    /// Only traces at least this slow
    pub min_duration_ms: Option<i64>,

    /// Substring match on the root span name
    pub name_contains: Option<String>,

    /// Only traces that ended at or after this instant
    pub since: Option<DateTime<Utc>>,

    /// Result cap, newest first (0 means the default of 100)
    pub limit: usize,
}

impl TraceFilter {
    fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            100
        } else {
            self.limit
        }
    }

    fn matches(&self, summary: &TraceSummary) -> bool {
        if let Some(service) = &self.service {
            if summary.service.as_deref() != Some(service.as_str()) {
                return false;
            }
        }
        if self.error_only && !summary.has_error {
            return false;
        }
        if let Some(min) = self.min_duration_ms {
            if summary.duration_ms.map(|d| d < min).unwrap_or(true) {
                return false;
            }
        }
        if let Some(fragment) = &self.name_contains {
            let hit = summary
                .root_name
                .as_deref()
                .map(|n| n.contains(fragment.as_str()))
                .unwrap_or(false);
            if !hit {
                return false;
            }
        }
        if let Some(since) = self.since {
            if !summary.ended_in(since) {
                return false;
            }
        }
        true
    }
}

/// Bounded correlated storage for one engine instance
pub struct CorrelationIndex {
    traces: Mutex<TraceStore>,
    metrics: Mutex<SeqRing<MetricSample>>,
    logs: Mutex<SeqRing<CorrelatedLogEntry>>,
    side: Mutex<HashMap<TraceId, TraceRefs>>,
    side_per_trace: usize,
}

impl CorrelationIndex {
    pub fn new(
        trace_capacity: usize,
        metric_capacity: usize,
        log_capacity: usize,
        side_per_trace: usize,
    ) -> Self {
        Self {
            traces: Mutex::new(TraceStore::new(trace_capacity)),
            metrics: Mutex::new(SeqRing::new(metric_capacity)),
            logs: Mutex::new(SeqRing::new(log_capacity)),
            side: Mutex::new(HashMap::new()),
            side_per_trace,
        }
    }

    /// Store a completed trace (full or aggregate)
    pub fn record_trace(&self, trace: RetainedTrace) {
        let evicted = self.traces.lock().push(trace);
        // the evicted trace's side entry goes now; its ring sequences are
        // already unreachable through any lookup path
        if let Some(old) = evicted {
            self.side.lock().remove(&old);
        }
    }

    /// Store a metric sample and index it under its exemplar trace
    pub fn record_metric(&self, sample: MetricSample) {
        let trace_id = sample.exemplar_trace_id;
        let seq = self.metrics.lock().push(sample);
        if let Some(id) = trace_id {
            let mut side = self.side.lock();
            let refs = side.entry(id).or_default();
            if refs.metric_seqs.len() == self.side_per_trace {
                refs.metric_seqs.pop_front();
            }
            refs.metric_seqs.push_back(seq);
        }
    }

    /// Store a log entry and index it under its trace
    pub fn record_log(&self, entry: CorrelatedLogEntry) {
        let trace_id = entry.trace_id;
        let seq = self.logs.lock().push(entry);
        if let Some(id) = trace_id {
            let mut side = self.side.lock();
            let refs = side.entry(id).or_default();
            if refs.log_seqs.len() == self.side_per_trace {
                refs.log_seqs.pop_front();
            }
            refs.log_seqs.push_back(seq);
        }
    }

    /// The retained trace for an id, if it is still in the ring
    pub fn get_trace(&self, trace_id: TraceId) -> Option<RetainedTrace> {
        self.traces.lock().by_id.get(&trace_id).cloned()
    }

    /// Trace plus every correlated log and metric still retained
    ///
    /// Side-index sequences whose ring entry has been evicted are pruned
    /// here, on the lookup miss, not eagerly at eviction time.
    pub fn get_correlated(&self, trace_id: TraceId) -> CorrelatedView {
        let trace = self.get_trace(trace_id);

        let mut logs = Vec::new();
        let mut metrics = Vec::new();
        let mut side = self.side.lock();
        if let Some(refs) = side.get_mut(&trace_id) {
            {
                let ring = self.logs.lock();
                refs.log_seqs.retain(|seq| ring.get(*seq).is_some());
                logs.extend(refs.log_seqs.iter().filter_map(|s| ring.get(*s).cloned()));
            }
            {
                let ring = self.metrics.lock();
                refs.metric_seqs.retain(|seq| ring.get(*seq).is_some());
                metrics.extend(refs.metric_seqs.iter().filter_map(|s| ring.get(*s).cloned()));
            }
        }

        CorrelatedView {
            trace,
            logs,
            metrics,
        }
    }

    /// Newest-first summaries matching the filter
    pub fn search(&self, filter: &TraceFilter) -> Vec<TraceSummary> {
        let store = self.traces.lock();
        let mut out = Vec::new();
        for id in store.order.iter().rev() {
            if out.len() >= filter.effective_limit() {
                break;
            }
            if let Some(trace) = store.by_id.get(id) {
                let summary = trace.summary();
                if filter.matches(&summary) {
                    out.push(summary);
                }
            }
        }
        out
    }

    /// Root-span traffic and error tally for one service since an instant
    ///
    /// Counts aggregate-only traces too: discarding span detail never
    /// removes a trace from the aggregate view.
    pub fn window_tally(&self, service: &str, since: DateTime<Utc>) -> (u64, u64) {
        let store = self.traces.lock();
        let mut total = 0u64;
        let mut errors = 0u64;
        for id in store.order.iter().rev() {
            let Some(trace) = store.by_id.get(id) else {
                continue;
            };
            let summary = trace.summary();
            if !summary.ended_in(since) {
                // order is insertion order, close enough to time order to
                // stop at the first stale entry
                break;
            }
            if summary.service.as_deref() != Some(service) {
                continue;
            }
            total += 1;
            if summary.has_error {
                errors += 1;
            }
        }
        (total, errors)
    }

    pub fn trace_count(&self) -> usize {
        self.traces.lock().order.len()
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.lock().len()
    }

    pub fn log_count(&self) -> usize {
        self.logs.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pulse_core::ids::SpanId;
    use pulse_core::record::{LogLevel, MetricKind};
    use pulse_core::span::{Span, SpanKind, SpanStatus, SERVICE_TAG};
    use pulse_core::trace::Trace;
    use pulse_metrics::sample_at;

    fn small_index() -> CorrelationIndex {
        CorrelationIndex::new(3, 4, 4, 8)
    }

    fn full_trace(service: &str, duration_ms: i64, error: bool) -> RetainedTrace {
        let trace_id = TraceId::generate();
        let mut root = Span::open(
            trace_id,
            SpanId::generate(),
            None,
            "request",
            SpanKind::Server,
            Utc::now() - Duration::milliseconds(duration_ms),
        );
        root.tags.insert(SERVICE_TAG, service);
        let status = if error {
            SpanStatus::error("boom")
        } else {
            SpanStatus::Ok
        };
        root.finish(status, Utc::now());
        RetainedTrace::Full(Trace::new(trace_id, vec![root]))
    }

    fn log_for(trace_id: TraceId) -> CorrelatedLogEntry {
        CorrelatedLogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: "hello".into(),
            trace_id: Some(trace_id),
            span_id: None,
        }
    }

    fn metric_for(trace_id: TraceId) -> MetricSample {
        let mut s = sample_at("latency_ms", MetricKind::Histogram, 5.0, Default::default(), Utc::now());
        s.exemplar_trace_id = Some(trace_id);
        s
    }

    #[test]
    fn test_get_trace_round_trip() {
        let index = small_index();
        let trace = full_trace("api", 10, false);
        let id = trace.trace_id();
        index.record_trace(trace.clone());
        assert_eq!(index.get_trace(id), Some(trace));
    }

    #[test]
    fn test_trace_ring_evicts_oldest() {
        let index = small_index();
        let first = full_trace("api", 10, false);
        let first_id = first.trace_id();
        index.record_trace(first);

        let mut newest_ids = Vec::new();
        for _ in 0..3 {
            let t = full_trace("api", 10, false);
            newest_ids.push(t.trace_id());
            index.record_trace(t);
        }

        assert_eq!(index.get_trace(first_id), None);
        for id in newest_ids {
            assert!(index.get_trace(id).is_some());
        }
        assert_eq!(index.trace_count(), 3);
    }

    #[test]
    fn test_correlated_view_ties_signals_together() {
        let index = small_index();
        let trace = full_trace("api", 10, false);
        let id = trace.trace_id();
        index.record_trace(trace);
        index.record_log(log_for(id));
        index.record_metric(metric_for(id));
        // unrelated records must not leak in
        index.record_log(log_for(TraceId::generate()));

        let view = index.get_correlated(id);
        assert!(view.trace.is_some());
        assert_eq!(view.logs.len(), 1);
        assert_eq!(view.metrics.len(), 1);
        assert_eq!(view.metrics[0].exemplar_trace_id, Some(id));
    }

    #[test]
    fn test_lazy_prune_after_ring_eviction() {
        let index = small_index();
        let trace = full_trace("api", 10, false);
        let id = trace.trace_id();
        index.record_trace(trace);
        index.record_log(log_for(id));
        // push the correlated entry out of the 4-slot log ring
        for _ in 0..4 {
            index.record_log(log_for(TraceId::generate()));
        }

        let view = index.get_correlated(id);
        assert!(view.logs.is_empty());
        // the stale sequence was pruned, not just skipped
        let again = index.get_correlated(id);
        assert!(again.logs.is_empty());
    }

    #[test]
    fn test_side_index_bounded_per_trace() {
        let index = CorrelationIndex::new(3, 100, 100, 2);
        let trace = full_trace("api", 10, false);
        let id = trace.trace_id();
        index.record_trace(trace);
        for _ in 0..5 {
            index.record_log(log_for(id));
        }
        let view = index.get_correlated(id);
        assert_eq!(view.logs.len(), 2);
    }

    #[test]
    fn test_search_filters() {
        let index = CorrelationIndex::new(100, 10, 10, 8);
        index.record_trace(full_trace("api", 10, false));
        index.record_trace(full_trace("api", 250, true));
        index.record_trace(full_trace("db", 300, false));

        let errors = index.search(&TraceFilter {
            error_only: true,
            ..Default::default()
        });
        assert_eq!(errors.len(), 1);
        assert!(errors[0].has_error);

        let slow_api = index.search(&TraceFilter {
            service: Some("api".into()),
            min_duration_ms: Some(200),
            ..Default::default()
        });
        assert_eq!(slow_api.len(), 1);
        assert_eq!(slow_api[0].service.as_deref(), Some("api"));

        let named = index.search(&TraceFilter {
            name_contains: Some("req".into()),
            ..Default::default()
        });
        assert_eq!(named.len(), 3);
    }

    #[test]
    fn test_search_newest_first_with_limit() {
        let index = CorrelationIndex::new(100, 10, 10, 8);
        for _ in 0..5 {
            index.record_trace(full_trace("api", 10, false));
        }
        let hits = index.search(&TraceFilter {
            limit: 2,
            ..Default::default()
        });
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_window_tally_counts_aggregates() {
        let index = CorrelationIndex::new(100, 10, 10, 8);
        index.record_trace(full_trace("api", 10, true));
        if let RetainedTrace::Full(t) = full_trace("api", 10, false) {
            index.record_trace(RetainedTrace::Aggregate(t.summarize()));
        }

        let since = Utc::now() - Duration::minutes(1);
        let (total, errors) = index.window_tally("api", since);
        assert_eq!(total, 2);
        assert_eq!(errors, 1);
    }
}
