//! Correlated record types - metric samples, log entries, anomaly alerts,
//! and dependency edges
//!
//! Everything here carries (or can carry) the trace/span ids that were
//! active when it was produced, which is what lets the correlation index
//! tie the three signal kinds together under one identifier.

use crate::ids::{SpanId, TraceId};
use crate::kv::KvMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric instrument kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// One recorded metric observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub labels: KvMap,
    pub timestamp: DateTime<Utc>,

    /// Trace active when the sample was recorded, if any
    pub exemplar_trace_id: Option<TraceId>,

    /// Span active when the sample was recorded, if any
    pub exemplar_span_id: Option<SpanId>,
}

impl MetricSample {
    /// Stable series identity: name plus canonical label key
    pub fn series_key(&self) -> String {
        if self.labels.is_empty() {
            self.name.clone()
        } else {
            format!("{}{{{}}}", self.name, self.labels.canonical_key())
        }
    }
}

/// Log severity, ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// A log line tagged with the trace/span it was emitted under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,

    /// Both ids are None when the line was recorded outside a trace
    pub trace_id: Option<TraceId>,
    pub span_id: Option<SpanId>,
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A deviation flagged by the anomaly detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    /// Series the deviation was observed on
    pub metric_key: String,

    /// EMA baseline before the offending observation
    pub baseline: f64,

    pub observed: f64,

    /// observed / baseline
    pub deviation_ratio: f64,

    pub severity: Severity,
    pub recommended_action: String,
    pub detected_at: DateTime<Utc>,
}

/// One edge of the service call graph
///
/// Derived from parent/child span pairs whose service tags differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDependencyEdge {
    pub caller_service: String,
    pub callee_service: String,
    pub call_count: u64,
    pub error_count: u64,

    /// Sum of callee span durations, milliseconds
    pub total_latency_ms: u64,
}

impl ServiceDependencyEdge {
    pub fn new(caller_service: impl Into<String>, callee_service: impl Into<String>) -> Self {
        Self {
            caller_service: caller_service.into(),
            callee_service: callee_service.into(),
            call_count: 0,
            error_count: 0,
            total_latency_ms: 0,
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.call_count == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.call_count as f64
        }
    }
}
