//! Trace assembly - parking finished spans until the root completes
//!
//! Tail sampling needs every span of a trace available when the retention
//! decision is made, so finished non-root spans wait here keyed by trace
//! id. When the root finalizes, the whole set is handed back as a
//! `Trace`. Assemblies whose root never arrives are flushed by the same
//! staleness sweep that closes abandoned spans.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use pulse_core::ids::TraceId;
use pulse_core::span::Span;
use pulse_core::trace::Trace;
use std::collections::HashMap;
use tracing::debug;

struct Pending {
    spans: Vec<Span>,
    last_activity: DateTime<Utc>,
}

/// Collects finished spans per trace until the root arrives
pub struct TraceAssembler {
    pending: Mutex<HashMap<TraceId, Pending>>,

    /// Per-trace cap on buffered spans; beyond it the oldest are kept and
    /// later spans dropped (a trace this wide is itself a defect)
    max_spans_per_trace: usize,
}

impl TraceAssembler {
    pub fn new(max_spans_per_trace: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            max_spans_per_trace,
        }
    }

    /// Add a finished span; returns the complete trace when `span` is the
    /// trace's local root, `None` while the trace is still open
    ///
    /// `is_local_root` covers both a true root (no parent) and a span
    /// whose parent lives in another process; the caller knows which spans
    /// it opened at a request boundary.
    pub fn add(&self, span: Span, is_local_root: bool, now: DateTime<Utc>) -> Option<Trace> {
        let is_root = is_local_root || span.parent_span_id.is_none();
        let trace_id = span.trace_id;
        let mut pending = self.pending.lock();

        if is_root {
            let mut spans = pending
                .remove(&trace_id)
                .map(|p| p.spans)
                .unwrap_or_default();
            spans.push(span);
            return Some(Trace::new(trace_id, spans));
        }

        let entry = pending.entry(trace_id).or_insert_with(|| Pending {
            spans: Vec::new(),
            last_activity: now,
        });
        if entry.spans.len() >= self.max_spans_per_trace {
            debug!(
                "trace {} exceeded {} buffered spans, dropping span {}",
                trace_id, self.max_spans_per_trace, span.span_id
            );
            return None;
        }
        entry.spans.push(span);
        entry.last_activity = now;
        None
    }

    /// Flush assemblies with no activity for `stale_after`
    ///
    /// The root never arrived (remote root, crashed handler, or abandoned
    /// request); the buffered spans are returned as partial traces so they
    /// can still be counted.
    pub fn sweep_stale(&self, stale_after: Duration, now: DateTime<Utc>) -> Vec<Trace> {
        let cutoff = now - stale_after;
        let mut pending = self.pending.lock();
        let stale_ids: Vec<TraceId> = pending
            .iter()
            .filter(|(_, p)| p.last_activity <= cutoff)
            .map(|(id, _)| *id)
            .collect();
        stale_ids
            .into_iter()
            .filter_map(|id| {
                pending
                    .remove(&id)
                    .map(|p| Trace::new(id, p.spans))
            })
            .collect()
    }

    /// Number of traces currently waiting for their root
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
