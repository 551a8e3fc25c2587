//! Assembled traces and retention forms
//!
//! A trace is the set of spans sharing one trace id, complete when its
//! root finalizes. Depending on the sampling verdict, a completed trace is
//! retained either in full or as an aggregate summary.

use crate::ids::{SpanId, TraceId};
use crate::span::Span;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// All locally-known spans of one trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: TraceId,
    pub spans: Vec<Span>,
}

impl Trace {
    pub fn new(trace_id: TraceId, spans: Vec<Span>) -> Self {
        Self { trace_id, spans }
    }

    /// The root span: parent is null, or the parent is not known locally
    /// (root of the local subtree when the real root lives elsewhere)
    pub fn root(&self) -> Option<&Span> {
        if let Some(root) = self.spans.iter().find(|s| s.parent_span_id.is_none()) {
            return Some(root);
        }
        let local: HashSet<SpanId> = self.spans.iter().map(|s| s.span_id).collect();
        self.spans
            .iter()
            .find(|s| s.parent_span_id.map(|p| !local.contains(&p)).unwrap_or(false))
    }

    /// Duration of the root span, once it has finalized
    pub fn duration(&self) -> Option<Duration> {
        self.root().and_then(|root| root.duration())
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.duration().map(|d| d.num_milliseconds())
    }

    /// True if any span in the trace ended in error
    pub fn has_error(&self) -> bool {
        self.spans.iter().any(|s| s.status.is_error())
    }

    pub fn span(&self, span_id: SpanId) -> Option<&Span> {
        self.spans.iter().find(|s| s.span_id == span_id)
    }

    /// Spans whose parent is `span_id`
    pub fn children_of(&self, span_id: SpanId) -> Vec<&Span> {
        self.spans
            .iter()
            .filter(|s| s.parent_span_id == Some(span_id))
            .collect()
    }

    /// Verify the parent-pointer invariant: pointers restricted to locally
    /// present spans must form a forest (no cycles). Spans referencing a
    /// parent that is not present locally are remote-parent leaves and are
    /// valid.
    pub fn is_tree(&self) -> bool {
        let by_id: HashMap<SpanId, &Span> =
            self.spans.iter().map(|s| (s.span_id, s)).collect();
        if by_id.len() != self.spans.len() {
            return false; // duplicate span ids
        }
        for span in &self.spans {
            // Walk up from each span; a cycle would revisit the start
            let mut seen = HashSet::new();
            let mut current = span.span_id;
            seen.insert(current);
            while let Some(parent) = by_id.get(&current).and_then(|s| s.parent_span_id) {
                if !by_id.contains_key(&parent) {
                    break; // remote parent, valid leaf of the local tree
                }
                if !seen.insert(parent) {
                    return false;
                }
                current = parent;
            }
        }
        true
    }

    /// Condense into the aggregate form kept for unsampled traces
    pub fn summarize(&self) -> TraceSummary {
        let root = self.root();
        TraceSummary {
            trace_id: self.trace_id,
            root_name: root.map(|r| r.name.clone()),
            service: root.and_then(|r| r.service().map(str::to_owned)),
            span_count: self.spans.len(),
            started_at: root.map(|r| r.start_time),
            ended_at: root.and_then(|r| r.end_time),
            duration_ms: self.duration_ms(),
            has_error: self.has_error(),
        }
    }
}

/// Aggregate view of a completed trace
///
/// This is everything tail sampling keeps for a discarded trace: enough to
/// count traffic and errors, nothing span-level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: TraceId,
    pub root_name: Option<String>,
    pub service: Option<String>,
    pub span_count: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub has_error: bool,
}

/// A completed trace as held by the correlation index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetainedTrace {
    /// Full span detail retained by the sampler
    Full(Trace),
    /// Aggregate-only data for a discarded trace
    Aggregate(TraceSummary),
}

impl RetainedTrace {
    pub fn trace_id(&self) -> TraceId {
        match self {
            Self::Full(trace) => trace.trace_id,
            Self::Aggregate(summary) => summary.trace_id,
        }
    }

    pub fn summary(&self) -> TraceSummary {
        match self {
            Self::Full(trace) => trace.summarize(),
            Self::Aggregate(summary) => summary.clone(),
        }
    }

    /// Full span detail, if retained
    pub fn spans(&self) -> Option<&[Span]> {
        match self {
            Self::Full(trace) => Some(&trace.spans),
            Self::Aggregate(_) => None,
        }
    }
}

impl TraceSummary {
    pub fn ended_in(&self, since: DateTime<Utc>) -> bool {
        self.ended_at.map(|t| t >= since).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{SpanKind, SpanStatus};

    fn span(trace_id: TraceId, id: u64, parent: Option<u64>) -> Span {
        let mut s = Span::open(
            trace_id,
            SpanId(id),
            parent.map(SpanId),
            format!("span-{}", id),
            SpanKind::Internal,
            Utc::now(),
        );
        s.finish(SpanStatus::Ok, Utc::now() + Duration::milliseconds(10));
        s
    }

    #[test]
    fn test_single_root_and_tree_shape() {
        let trace_id = TraceId::generate();
        let spans = vec![
            span(trace_id, 1, None),
            span(trace_id, 2, Some(1)),
            span(trace_id, 3, Some(1)),
            span(trace_id, 4, Some(2)),
        ];
        let trace = Trace::new(trace_id, spans);

        assert_eq!(trace.root().unwrap().span_id, SpanId(1));
        assert!(trace.is_tree());
        let with_parent = trace
            .spans
            .iter()
            .filter(|s| s.parent_span_id.is_some())
            .count();
        assert_eq!(with_parent, trace.spans.len() - 1);
    }

    #[test]
    fn test_remote_parent_is_valid_root() {
        let trace_id = TraceId::generate();
        // parent 99 is not present locally
        let spans = vec![span(trace_id, 1, Some(99)), span(trace_id, 2, Some(1))];
        let trace = Trace::new(trace_id, spans);

        assert_eq!(trace.root().unwrap().span_id, SpanId(1));
        assert!(trace.is_tree());
    }

    #[test]
    fn test_cycle_detected() {
        let trace_id = TraceId::generate();
        let spans = vec![span(trace_id, 1, Some(2)), span(trace_id, 2, Some(1))];
        let trace = Trace::new(trace_id, spans);
        assert!(!trace.is_tree());
    }

    #[test]
    fn test_has_error_any_span() {
        let trace_id = TraceId::generate();
        let mut bad = span(trace_id, 2, Some(1));
        bad.status = SpanStatus::error("boom");
        let trace = Trace::new(trace_id, vec![span(trace_id, 1, None), bad]);
        assert!(trace.has_error());
    }

    #[test]
    fn test_summary_captures_root_fields() {
        let trace_id = TraceId::generate();
        let mut root = span(trace_id, 1, None);
        root.tags.insert(crate::span::SERVICE_TAG, "api");
        let trace = Trace::new(trace_id, vec![root, span(trace_id, 2, Some(1))]);

        let summary = trace.summarize();
        assert_eq!(summary.service.as_deref(), Some("api"));
        assert_eq!(summary.span_count, 2);
        assert!(!summary.has_error);
        assert_eq!(summary.duration_ms, Some(10));
    }

    #[test]
    fn test_retained_aggregate_has_no_spans() {
        let trace_id = TraceId::generate();
        let trace = Trace::new(trace_id, vec![span(trace_id, 1, None)]);
        let retained = RetainedTrace::Aggregate(trace.summarize());
        assert!(retained.spans().is_none());
        assert_eq!(retained.trace_id(), trace_id);
    }
}
