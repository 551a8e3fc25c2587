//! Pulse Export - read-side serialization and alert delivery
//!
//! - **Prometheus**: text exposition of the metrics registry snapshot
//! - **Json**: trace export for offline analysis
//! - **Jsonl**: an [`AlertSink`] that appends anomaly alerts to a file

use async_trait::async_trait;
use pulse_core::record::AnomalyAlert;
use thiserror::Error;

pub mod json;
pub mod jsonl;
pub mod prometheus;

pub use json::{trace_to_json, trace_to_string};
pub use jsonl::{JsonlAlertSink, JsonlSinkConfig};
pub use prometheus::render_prometheus;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sink error: {0}")]
    Sink(String),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Destination for anomaly alerts
///
/// The engine drives sinks off the hot path; a failing sink is logged
/// and skipped, never propagated to instrumentation callers.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Sink name, for logs
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &AnomalyAlert) -> ExportResult<()>;
}
