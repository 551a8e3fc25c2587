//! Trace context - the per-hop identity propagated with a request
//!
//! A context is immutable once created for a hop. Each child operation
//! derives a fresh context: same trace id, new span id, parent set to the
//! previous span id. The sampled bit and baggage travel unchanged.

use crate::ids::{SpanId, TraceId};
use crate::kv::KvMap;
use serde::{Deserialize, Serialize};

/// W3C limit on tracestate list length
pub const MAX_TRACE_STATE_ENTRIES: usize = 32;

/// W3C limit on a single tracestate `key=value` entry, in bytes
pub const MAX_TRACE_STATE_ENTRY_BYTES: usize = 256;

/// Ordered vendor key=value pairs from the `tracestate` header
///
/// Foreign vendor keys are preserved and re-emitted unmodified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceState {
    entries: Vec<(String, String)>,
}

impl TraceState {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry, enforcing W3C limits
    ///
    /// Returns false (and drops the entry) if the list is full, the key or
    /// value is empty, or the serialized entry exceeds the per-entry byte
    /// limit. An existing key is updated in place.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            return false;
        }
        if key.len() + 1 + value.len() > MAX_TRACE_STATE_ENTRY_BYTES {
            return false;
        }
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return true;
        }
        if self.entries.len() >= MAX_TRACE_STATE_ENTRIES {
            return false;
        }
        self.entries.push((key, value));
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize back to the comma-separated header form
    pub fn to_header(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Cross-hop key/value context, distinct from tracestate
pub type Baggage = KvMap;

/// Carries trace identity through one hop of a request chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    /// The trace this hop belongs to
    pub trace_id: TraceId,

    /// The span representing this hop
    pub span_id: SpanId,

    /// Parent span, if this hop has one (local or remote)
    pub parent_span_id: Option<SpanId>,

    /// Head sampling decision, propagated unchanged to descendants
    pub sampled: bool,

    /// Vendor tracestate entries, passed through
    pub trace_state: TraceState,

    /// Baggage, propagated unchanged across every hop
    pub baggage: Baggage,
}

impl TraceContext {
    /// Start a fresh root context with a new trace id
    pub fn new_root(sampled: bool) -> Self {
        Self {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            parent_span_id: None,
            sampled,
            trace_state: TraceState::new(),
            baggage: Baggage::new(),
        }
    }

    /// Derive the context for a child operation
    ///
    /// Same trace id, fresh span id, parent set to this hop's span id.
    /// The sampled bit, tracestate, and baggage carry over unchanged.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::generate(),
            parent_span_id: Some(self.span_id),
            sampled: self.sampled,
            trace_state: self.trace_state.clone(),
            baggage: self.baggage.clone(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }
}
