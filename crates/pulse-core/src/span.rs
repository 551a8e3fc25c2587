//! Span model - a single timed operation within a trace

use crate::ids::{SpanId, TraceId};
use crate::kv::KvMap;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tag key that marks which service a span executed in
///
/// The dependency mapper treats a parent/child pair with differing values
/// of this tag as a service-boundary crossing.
pub const SERVICE_TAG: &str = "service.name";

/// Role of a span relative to the operation it describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Server,
    Client,
    Producer,
    Consumer,
    Internal,
}

/// Final status of a span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error { message: String },
}

impl SpanStatus {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// A timestamped event attached to a span while it is open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub attributes: KvMap,
}

/// A single timed operation within a trace
///
/// Mutated only by the owning execution context while open; finalized
/// exactly once; immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub span_id: SpanId,
    pub trace_id: TraceId,

    /// None for a root span; a locally-unknown parent means the parent
    /// lives in another process (remote-parent leaf, still valid)
    pub parent_span_id: Option<SpanId>,

    pub name: String,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,

    /// None while the span is open
    pub end_time: Option<DateTime<Utc>>,

    pub status: SpanStatus,
    pub tags: KvMap,
    pub events: Vec<SpanEvent>,
}

impl Span {
    /// Open a new span for the hop described by `ctx`
    pub fn open(
        trace_id: TraceId,
        span_id: SpanId,
        parent_span_id: Option<SpanId>,
        name: impl Into<String>,
        kind: SpanKind,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            span_id,
            trace_id,
            parent_span_id,
            name: name.into(),
            kind,
            start_time,
            end_time: None,
            status: SpanStatus::Unset,
            tags: KvMap::new(),
            events: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Wall-clock duration, once finalized
    pub fn duration(&self) -> Option<Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.duration().map(|d| d.num_milliseconds())
    }

    /// The service this span executed in, if tagged
    pub fn service(&self) -> Option<&str> {
        self.tags.get(SERVICE_TAG)
    }

    /// Finalize the span. Must be called exactly once.
    pub fn finish(&mut self, status: SpanStatus, end_time: DateTime<Utc>) {
        self.end_time = Some(end_time);
        self.status = status;
    }
}
