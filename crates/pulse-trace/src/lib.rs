//! Pulse Trace - context propagation, span lifecycle, and sampling
//!
//! This crate owns the request-path tracing machinery:
//!
//! - **Propagation**: W3C `traceparent`/`tracestate` and `baggage` headers
//! - **Lifecycle**: the active-span registry with its staleness sweep
//! - **Assembly**: parking finished spans until their root completes
//! - **Sampling**: head, tail, and adaptive retention strategies

pub mod assembler;
pub mod lifecycle;
pub mod propagation;
pub mod sampler;

pub use assembler::TraceAssembler;
pub use lifecycle::SpanTracker;
pub use propagation::{extract, inject, BAGGAGE_HEADER, TRACEPARENT_HEADER, TRACESTATE_HEADER};
pub use sampler::{Sampler, SamplerVerdict};
