//! Golden signals - latency, traffic, errors, saturation per service
//!
//! Computed on demand from the correlation index (traffic, errors) and
//! the metrics registry (latency percentiles, queue depth). Nothing here
//! keeps state; each call is a snapshot over the requested window.

use chrono::{DateTime, Duration, Utc};
use pulse_core::kv::KvMap;
use pulse_metrics::{MetricsRegistry, Percentiles};
use serde::{Deserialize, Serialize};

use crate::index::CorrelationIndex;

/// Histogram the engine feeds with request durations
pub const REQUEST_DURATION_METRIC: &str = "pulse_request_duration_ms";
/// Gauge consulted for queue depth, if the host application reports one
pub const QUEUE_DEPTH_METRIC: &str = "pulse_queue_depth";

/// Fixed lookback windows for signal snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalWindow {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
}

impl SignalWindow {
    pub fn as_duration(&self) -> Duration {
        match self {
            SignalWindow::OneMinute => Duration::minutes(1),
            SignalWindow::FiveMinutes => Duration::minutes(5),
            SignalWindow::FifteenMinutes => Duration::minutes(15),
        }
    }

    pub fn as_secs(&self) -> f64 {
        self.as_duration().num_seconds() as f64
    }
}

/// Resource pressure indicators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saturation {
    /// Spans currently open for the service
    pub open_spans: usize,
    /// Reported queue depth, if any
    pub queue_depth: Option<f64>,
}

/// Snapshot of the four golden signals for one service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenSignals {
    pub service: String,
    pub window: SignalWindow,
    pub computed_at: DateTime<Utc>,
    /// Latency percentiles over the histogram window; None when the
    /// service has recorded no durations yet
    pub latency: Option<Percentiles>,
    /// Completed traces in the window
    pub request_count: u64,
    /// Requests per second over the window
    pub traffic_rps: f64,
    pub error_count: u64,
    /// Errored traces over total, 0.0 when the window is empty
    pub error_ratio: f64,
    pub saturation: Saturation,
}

/// Compute the golden signals for `service` over `window`, as of `now`
pub fn golden_signals(
    service: &str,
    window: SignalWindow,
    index: &CorrelationIndex,
    metrics: &MetricsRegistry,
    open_spans: usize,
    now: DateTime<Utc>,
) -> GoldenSignals {
    let since = now - window.as_duration();
    let (request_count, error_count) = index.window_tally(service, since);

    let mut labels = KvMap::new();
    labels.insert("service", service);

    let latency = metrics.percentiles(REQUEST_DURATION_METRIC, &labels);
    let queue_depth = metrics.gauge_value(QUEUE_DEPTH_METRIC, &labels);

    let error_ratio = if request_count > 0 {
        error_count as f64 / request_count as f64
    } else {
        0.0
    };

    GoldenSignals {
        service: service.to_string(),
        window,
        computed_at: now,
        latency,
        request_count,
        traffic_rps: request_count as f64 / window.as_secs(),
        error_count,
        error_ratio,
        saturation: Saturation {
            open_spans,
            queue_depth,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::ids::{SpanId, TraceId};
    use pulse_core::span::{Span, SpanKind, SpanStatus, SERVICE_TAG};
    use pulse_core::trace::{RetainedTrace, Trace};

    fn finished_root(service: &str, error: bool, ended: DateTime<Utc>) -> Trace {
        let trace_id = TraceId::generate();
        let mut span = Span::open(
            trace_id,
            SpanId::generate(),
            None,
            "GET /",
            SpanKind::Server,
            ended - Duration::milliseconds(25),
        );
        span.tags.insert(SERVICE_TAG, service);
        let status = if error {
            SpanStatus::error("boom")
        } else {
            SpanStatus::Ok
        };
        span.finish(status, ended);
        Trace {
            trace_id,
            spans: vec![span],
        }
    }

    fn index() -> CorrelationIndex {
        CorrelationIndex::new(100, 100, 100, 16)
    }

    #[test]
    fn test_traffic_and_errors_from_trace_window() {
        let idx = index();
        let now = Utc::now();
        for i in 0..10 {
            let trace = finished_root("api", i < 3, now - Duration::seconds(5));
            idx.record_trace(RetainedTrace::Full(trace));
        }
        // stale trace outside the window
        let old = finished_root("api", true, now - Duration::minutes(30));
        idx.record_trace(RetainedTrace::Full(old));

        let metrics = MetricsRegistry::new(1000);
        let signals = golden_signals("api", SignalWindow::OneMinute, &idx, &metrics, 2, now);

        assert_eq!(signals.request_count, 10);
        assert_eq!(signals.error_count, 3);
        assert!((signals.error_ratio - 0.3).abs() < 1e-9);
        assert!((signals.traffic_rps - 10.0 / 60.0).abs() < 1e-9);
        assert_eq!(signals.saturation.open_spans, 2);
        assert!(signals.saturation.queue_depth.is_none());
    }

    #[test]
    fn test_latency_percentiles_from_registry() {
        let idx = index();
        let metrics = MetricsRegistry::new(1000);
        let mut labels = KvMap::new();
        labels.insert("service", "api");
        for ms in 1..=100 {
            metrics.observe_histogram(REQUEST_DURATION_METRIC, labels.clone(), ms as f64, None);
        }

        let signals =
            golden_signals("api", SignalWindow::FiveMinutes, &idx, &metrics, 0, Utc::now());
        let latency = signals.latency.expect("histogram present");
        assert_eq!(latency.count, 100);
        assert_eq!(latency.p50, 50.0);
        assert_eq!(latency.p99, 99.0);
    }

    #[test]
    fn test_empty_window_zeroes() {
        let idx = index();
        let metrics = MetricsRegistry::new(1000);
        let signals =
            golden_signals("ghost", SignalWindow::FifteenMinutes, &idx, &metrics, 0, Utc::now());
        assert_eq!(signals.request_count, 0);
        assert_eq!(signals.error_ratio, 0.0);
        assert_eq!(signals.traffic_rps, 0.0);
        assert!(signals.latency.is_none());
    }

    #[test]
    fn test_window_durations() {
        assert_eq!(SignalWindow::OneMinute.as_secs(), 60.0);
        assert_eq!(SignalWindow::FiveMinutes.as_secs(), 300.0);
        assert_eq!(SignalWindow::FifteenMinutes.as_secs(), 900.0);
    }
}
