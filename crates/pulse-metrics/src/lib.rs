//! Pulse Metrics - counters, gauges, and windowed histograms
//!
//! Instruments are keyed by metric name plus canonical label key. Every
//! write can capture the active trace/span as an exemplar, which is what
//! lets a dashboard jump from a metric to the trace behind it.
//!
//! Label cardinality is a caller contract: the registry does not bound
//! the number of label sets, so never use raw user input as a label value.

pub mod histogram;

pub use histogram::{HistogramWindow, Percentiles};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pulse_core::context::TraceContext;
use pulse_core::kv::KvMap;
use pulse_core::record::{MetricKind, MetricSample};
use std::collections::HashMap;
use tracing::warn;

/// Identity of one series: metric name + canonical label key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: String,
    labels_key: String,
}

impl SeriesKey {
    fn new(name: &str, labels: &KvMap) -> Self {
        Self {
            name: name.to_string(),
            labels_key: labels.canonical_key(),
        }
    }
}

struct CounterCell {
    labels: KvMap,
    value: f64,
}

struct GaugeCell {
    labels: KvMap,
    value: f64,
}

struct HistogramCell {
    labels: KvMap,
    window: HistogramWindow,
}

/// Read-only view of one series, for exposition
#[derive(Debug, Clone)]
pub enum SeriesSnapshot {
    Counter {
        name: String,
        labels: KvMap,
        value: f64,
    },
    Gauge {
        name: String,
        labels: KvMap,
        value: f64,
    },
    Histogram {
        name: String,
        labels: KvMap,
        total_count: u64,
        total_sum: f64,
        percentiles: Option<Percentiles>,
    },
}

/// The metrics engine: all instruments of one engine instance
pub struct MetricsRegistry {
    counters: RwLock<HashMap<SeriesKey, CounterCell>>,
    gauges: RwLock<HashMap<SeriesKey, GaugeCell>>,
    histograms: RwLock<HashMap<SeriesKey, HistogramCell>>,
    histogram_window: usize,
}

impl MetricsRegistry {
    pub fn new(histogram_window: usize) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            histogram_window,
        }
    }

    /// Monotonic counter increment
    ///
    /// A negative delta violates monotonicity: it is logged at warn level
    /// and dropped, returning `None`.
    pub fn add_counter(
        &self,
        name: &str,
        labels: KvMap,
        delta: f64,
        ctx: Option<&TraceContext>,
    ) -> Option<MetricSample> {
        if delta < 0.0 || !delta.is_finite() {
            warn!("counter {} dropped non-monotonic delta {}", name, delta);
            return None;
        }
        let key = SeriesKey::new(name, &labels);
        let mut counters = self.counters.write();
        let cell = counters.entry(key).or_insert_with(|| CounterCell {
            labels: labels.clone(),
            value: 0.0,
        });
        cell.value += delta;
        let value = cell.value;
        drop(counters);
        Some(sample(name, MetricKind::Counter, value, labels, ctx))
    }

    /// Gauge set
    pub fn set_gauge(
        &self,
        name: &str,
        labels: KvMap,
        value: f64,
        ctx: Option<&TraceContext>,
    ) -> Option<MetricSample> {
        if !value.is_finite() {
            warn!("gauge {} dropped non-finite value {}", name, value);
            return None;
        }
        let key = SeriesKey::new(name, &labels);
        let mut gauges = self.gauges.write();
        let cell = gauges.entry(key).or_insert_with(|| GaugeCell {
            labels: labels.clone(),
            value: 0.0,
        });
        cell.value = value;
        drop(gauges);
        Some(sample(name, MetricKind::Gauge, value, labels, ctx))
    }

    /// Histogram observation into the rolling window for this label set
    pub fn observe_histogram(
        &self,
        name: &str,
        labels: KvMap,
        value: f64,
        ctx: Option<&TraceContext>,
    ) -> Option<MetricSample> {
        if !value.is_finite() {
            warn!("histogram {} dropped non-finite value {}", name, value);
            return None;
        }
        let key = SeriesKey::new(name, &labels);
        let mut histograms = self.histograms.write();
        let cell = histograms.entry(key).or_insert_with(|| HistogramCell {
            labels: labels.clone(),
            window: HistogramWindow::new(self.histogram_window),
        });
        cell.window.observe(value);
        drop(histograms);
        Some(sample(name, MetricKind::Histogram, value, labels, ctx))
    }

    /// Current counter value, if the series exists
    pub fn counter_value(&self, name: &str, labels: &KvMap) -> Option<f64> {
        self.counters
            .read()
            .get(&SeriesKey::new(name, labels))
            .map(|c| c.value)
    }

    /// Current gauge value, if the series exists
    pub fn gauge_value(&self, name: &str, labels: &KvMap) -> Option<f64> {
        self.gauges
            .read()
            .get(&SeriesKey::new(name, labels))
            .map(|g| g.value)
    }

    /// Percentiles over the current window of one histogram series
    ///
    /// Copy-then-sort on read; the window itself is untouched.
    pub fn percentiles(&self, name: &str, labels: &KvMap) -> Option<Percentiles> {
        self.histograms
            .read()
            .get(&SeriesKey::new(name, labels))
            .and_then(|h| h.window.percentiles())
    }

    /// Snapshot of every series, for the text exposition
    pub fn snapshot(&self) -> Vec<SeriesSnapshot> {
        let mut out = Vec::new();
        for (key, cell) in self.counters.read().iter() {
            out.push(SeriesSnapshot::Counter {
                name: key.name.clone(),
                labels: cell.labels.clone(),
                value: cell.value,
            });
        }
        for (key, cell) in self.gauges.read().iter() {
            out.push(SeriesSnapshot::Gauge {
                name: key.name.clone(),
                labels: cell.labels.clone(),
                value: cell.value,
            });
        }
        for (key, cell) in self.histograms.read().iter() {
            out.push(SeriesSnapshot::Histogram {
                name: key.name.clone(),
                labels: cell.labels.clone(),
                total_count: cell.window.total_count(),
                total_sum: cell.window.total_sum(),
                percentiles: cell.window.percentiles(),
            });
        }
        out.sort_by(|a, b| snapshot_sort_key(a).cmp(&snapshot_sort_key(b)));
        out
    }
}

fn snapshot_sort_key(s: &SeriesSnapshot) -> (String, String) {
    match s {
        SeriesSnapshot::Counter { name, labels, .. }
        | SeriesSnapshot::Gauge { name, labels, .. }
        | SeriesSnapshot::Histogram { name, labels, .. } => {
            (name.clone(), labels.canonical_key())
        }
    }
}

fn sample(
    name: &str,
    kind: MetricKind,
    value: f64,
    labels: KvMap,
    ctx: Option<&TraceContext>,
) -> MetricSample {
    MetricSample {
        name: name.to_string(),
        kind,
        value,
        labels,
        timestamp: Utc::now(),
        exemplar_trace_id: ctx.map(|c| c.trace_id),
        exemplar_span_id: ctx.map(|c| c.span_id),
    }
}

/// Timestamped variant for tests and replay tooling
pub fn sample_at(
    name: &str,
    kind: MetricKind,
    value: f64,
    labels: KvMap,
    timestamp: DateTime<Utc>,
) -> MetricSample {
    MetricSample {
        name: name.to_string(),
        kind,
        value,
        labels,
        timestamp,
        exemplar_trace_id: None,
        exemplar_span_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> KvMap {
        pulse_core::kv!("service" => "api")
    }

    #[test]
    fn test_counter_accumulates() {
        let reg = MetricsRegistry::new(100);
        reg.add_counter("requests_total", labels(), 1.0, None);
        let s = reg.add_counter("requests_total", labels(), 2.0, None).unwrap();
        assert_eq!(s.value, 3.0);
        assert_eq!(reg.counter_value("requests_total", &labels()), Some(3.0));
    }

    #[test]
    fn test_counter_rejects_negative_delta() {
        let reg = MetricsRegistry::new(100);
        reg.add_counter("requests_total", labels(), 5.0, None);
        assert!(reg.add_counter("requests_total", labels(), -1.0, None).is_none());
        assert_eq!(reg.counter_value("requests_total", &labels()), Some(5.0));
    }

    #[test]
    fn test_gauge_sets_value() {
        let reg = MetricsRegistry::new(100);
        reg.set_gauge("queue_depth", labels(), 7.0, None);
        reg.set_gauge("queue_depth", labels(), 3.0, None);
        assert_eq!(reg.gauge_value("queue_depth", &labels()), Some(3.0));
    }

    #[test]
    fn test_histogram_percentiles_per_label_set() {
        let reg = MetricsRegistry::new(1000);
        let api = pulse_core::kv!("service" => "api");
        let db = pulse_core::kv!("service" => "db");
        for v in 1..=100 {
            reg.observe_histogram("latency_ms", api.clone(), v as f64, None);
        }
        reg.observe_histogram("latency_ms", db.clone(), 500.0, None);

        let p_api = reg.percentiles("latency_ms", &api).unwrap();
        let p_db = reg.percentiles("latency_ms", &db).unwrap();
        assert_eq!(p_api.p50, 50.0);
        assert_eq!(p_db.p50, 500.0);
    }

    #[test]
    fn test_label_order_does_not_split_series() {
        let reg = MetricsRegistry::new(100);
        let a = pulse_core::kv!("x" => "1", "y" => "2");
        let b = pulse_core::kv!("y" => "2", "x" => "1");
        reg.add_counter("c", a, 1.0, None);
        reg.add_counter("c", b.clone(), 1.0, None);
        assert_eq!(reg.counter_value("c", &b), Some(2.0));
    }

    #[test]
    fn test_exemplar_captured_from_context() {
        let reg = MetricsRegistry::new(100);
        let ctx = TraceContext::new_root(true);
        let s = reg
            .observe_histogram("latency_ms", labels(), 12.0, Some(&ctx))
            .unwrap();
        assert_eq!(s.exemplar_trace_id, Some(ctx.trace_id));
        assert_eq!(s.exemplar_span_id, Some(ctx.span_id));

        let bare = reg.add_counter("c", KvMap::new(), 1.0, None).unwrap();
        assert_eq!(bare.exemplar_trace_id, None);
    }

    #[test]
    fn test_snapshot_contains_all_kinds() {
        let reg = MetricsRegistry::new(100);
        reg.add_counter("c", KvMap::new(), 1.0, None);
        reg.set_gauge("g", KvMap::new(), 2.0, None);
        reg.observe_histogram("h", KvMap::new(), 3.0, None);

        let snapshot = reg.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot
            .iter()
            .any(|s| matches!(s, SeriesSnapshot::Histogram { total_count: 1, .. })));
    }
}
