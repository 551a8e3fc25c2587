//! Pulse Correlate - tying traces, metrics, and logs together
//!
//! This crate holds the read side of the engine:
//!
//! - **Index**: bounded ring buffers for traces, samples, and logs, with a
//!   per-trace side index for O(1) correlated lookups
//! - **Signals**: the four golden-signal views per service and window
//! - **Anomaly**: EMA-baseline deviation detection over the sample stream
//! - **Depmap**: the service call graph and per-trace critical path

pub mod anomaly;
pub mod depmap;
pub mod index;
pub mod signals;

pub use anomaly::{AlertBuffer, AnomalyDetector, AnomalySignal};
pub use depmap::{critical_path, DependencyMapper};
pub use index::{CorrelatedView, CorrelationIndex, TraceFilter};
pub use signals::{golden_signals, GoldenSignals, Saturation, SignalWindow};
