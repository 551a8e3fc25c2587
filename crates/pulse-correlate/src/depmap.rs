//! Dependency mapping - service call graph and per-trace critical path
//!
//! Edges accumulate from finished traces: every parent/child span pair
//! whose `service.name` tags differ is one observed call between two
//! services. The graph is cumulative for the engine's lifetime.

use parking_lot::Mutex;
use pulse_core::ids::SpanId;
use pulse_core::record::ServiceDependencyEdge;
use pulse_core::span::Span;
use pulse_core::trace::Trace;
use std::collections::HashMap;

/// Accumulates the service-to-service call graph
pub struct DependencyMapper {
    edges: Mutex<HashMap<(String, String), ServiceDependencyEdge>>,
}

impl DependencyMapper {
    pub fn new() -> Self {
        Self {
            edges: Mutex::new(HashMap::new()),
        }
    }

    /// Fold a finished trace into the graph
    ///
    /// Spans without a service tag, and parent/child pairs within the
    /// same service, contribute nothing.
    pub fn record_trace(&self, trace: &Trace) {
        let by_id: HashMap<SpanId, &Span> =
            trace.spans.iter().map(|s| (s.span_id, s)).collect();
        let mut edges = self.edges.lock();

        for span in &trace.spans {
            let Some(parent_id) = span.parent_span_id else {
                continue;
            };
            let Some(parent) = by_id.get(&parent_id) else {
                continue;
            };
            let (Some(caller), Some(callee)) = (parent.service(), span.service()) else {
                continue;
            };
            if caller == callee {
                continue;
            }

            let edge = edges
                .entry((caller.to_string(), callee.to_string()))
                .or_insert_with(|| ServiceDependencyEdge::new(caller, callee));
            edge.call_count += 1;
            if span.status.is_error() {
                edge.error_count += 1;
            }
            edge.total_latency_ms += span.duration_ms().unwrap_or(0).max(0) as u64;
        }
    }

    /// Snapshot of all observed edges, sorted by caller then callee
    pub fn graph(&self) -> Vec<ServiceDependencyEdge> {
        let mut edges: Vec<_> = self.edges.lock().values().cloned().collect();
        edges.sort_by(|a, b| {
            (a.caller_service.as_str(), a.callee_service.as_str())
                .cmp(&(b.caller_service.as_str(), b.callee_service.as_str()))
        });
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.lock().len()
    }
}

impl Default for DependencyMapper {
    fn default() -> Self {
        Self::new()
    }
}

/// Span ids along the slowest root-to-leaf path, root first
///
/// The weight of a path is the sum of its spans' own durations. Ties go
/// to whichever child the trace lists first.
pub fn critical_path(trace: &Trace) -> Vec<SpanId> {
    let Some(root) = trace.root() else {
        return Vec::new();
    };

    let mut children: HashMap<SpanId, Vec<&Span>> = HashMap::new();
    for span in &trace.spans {
        if let Some(parent) = span.parent_span_id {
            if span.span_id != root.span_id {
                children.entry(parent).or_default().push(span);
            }
        }
    }

    fn descend(
        span: &Span,
        children: &HashMap<SpanId, Vec<&Span>>,
        path: &mut Vec<SpanId>,
    ) -> i64 {
        path.push(span.span_id);
        let own = span.duration_ms().unwrap_or(0).max(0);
        let Some(kids) = children.get(&span.span_id) else {
            return own;
        };

        let mut best_weight = 0;
        let mut best_path: Vec<SpanId> = Vec::new();
        for kid in kids {
            let mut candidate = Vec::new();
            let weight = descend(kid, children, &mut candidate);
            if weight > best_weight || best_path.is_empty() {
                best_weight = weight;
                best_path = candidate;
            }
        }
        path.extend(best_path);
        own + best_weight
    }

    let mut path = Vec::new();
    descend(root, &children, &mut path);
    path
}
