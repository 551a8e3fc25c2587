//! Pulse Core - shared types, configuration, and errors
//!
//! This crate provides the foundational types for the Pulse observability
//! engine:
//!
//! - **Ids**: 128-bit trace ids and 64-bit span ids with fixed-width hex forms
//! - **Context**: W3C-compatible trace context, trace state, and baggage
//! - **Spans & traces**: the span lifecycle model and assembled traces
//! - **Records**: metric samples, correlated log entries, anomaly alerts,
//!   and service dependency edges
//! - **Config**: TOML configuration with env overrides and validation

pub mod config;
pub mod context;
pub mod error;
pub mod ids;
pub mod kv;
pub mod record;
pub mod span;
pub mod trace;

// Re-export commonly used types
pub use config::{ConfigLoader, EngineConfig, SamplingSettings};
pub use context::{Baggage, TraceContext, TraceState};
pub use error::{EngineError, EngineResult};
pub use ids::{SpanId, TraceId};
pub use kv::KvMap;
pub use record::{
    AnomalyAlert, CorrelatedLogEntry, LogLevel, MetricKind, MetricSample, Severity,
    ServiceDependencyEdge,
};
pub use span::{Span, SpanEvent, SpanKind, SpanStatus, SERVICE_TAG};
pub use trace::{RetainedTrace, Trace, TraceSummary};

/// Engine version
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
