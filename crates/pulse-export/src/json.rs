//! Trace JSON export
//!
//! A retained trace serializes to a single self-describing document:
//! fully retained traces carry their spans, aggregate-only traces carry
//! just the summary. Ids render as the same hex strings the wire headers
//! use.

use crate::ExportResult;
use pulse_core::trace::RetainedTrace;
use serde_json::{json, Value};

/// Build the export document for one retained trace
pub fn trace_to_json(trace: &RetainedTrace) -> ExportResult<Value> {
    let doc = match trace {
        RetainedTrace::Full(trace) => {
            let summary = trace.summarize();
            json!({
                "trace_id": trace.trace_id,
                "retention": "full",
                "summary": summary,
                "spans": trace.spans,
            })
        }
        RetainedTrace::Aggregate(summary) => json!({
            "trace_id": summary.trace_id,
            "retention": "aggregate",
            "summary": summary,
        }),
    };
    Ok(doc)
}

/// Pretty-printed export document
pub fn trace_to_string(trace: &RetainedTrace) -> ExportResult<String> {
    let doc = trace_to_json(trace)?;
    Ok(serde_json::to_string_pretty(&doc)?)
}
