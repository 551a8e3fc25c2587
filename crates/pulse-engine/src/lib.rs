//! Pulse Engine - the unified observability facade
//!
//! One engine instance per process. Wire it into a service like this:
//!
//! ```no_run
//! use pulse_engine::{ConfigLoader, ObservabilityEngine};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ConfigLoader::new().load()?;
//! let engine = Arc::new(ObservabilityEngine::new(config));
//! engine.start().await?;
//!
//! // per inbound request
//! let headers: HashMap<String, String> = HashMap::new();
//! let ctx = engine.on_request_start(&headers, "GET /orders");
//! // ... handle the request ...
//! engine.on_request_end(&ctx, 200);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod stats;

pub use engine::{
    ObservabilityEngine, ERROR_RATIO_METRIC, REQUEST_COUNT_METRIC, REQUEST_DURATION_METRIC,
};
pub use stats::{EngineStats, EngineStatsSnapshot};

// the types host applications touch directly
pub use pulse_core::config::{ConfigLoader, EngineConfig, SamplingSettings};
pub use pulse_core::context::TraceContext;
pub use pulse_core::error::{EngineError, EngineResult};
pub use pulse_core::ids::{SpanId, TraceId};
pub use pulse_core::kv::KvMap;
pub use pulse_core::record::{AnomalyAlert, LogLevel, Severity};
pub use pulse_core::span::{SpanKind, SpanStatus};
pub use pulse_core::trace::RetainedTrace;
pub use pulse_correlate::{GoldenSignals, SignalWindow, TraceFilter};
pub use pulse_export::{AlertSink, JsonlAlertSink, JsonlSinkConfig};

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install a global log subscriber at the configured level
///
/// Call once at process start, before the engine. Fails if a subscriber
/// is already installed.
pub fn init_logging(level: &str) -> EngineResult<()> {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?;
    Ok(())
}
