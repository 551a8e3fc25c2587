//! Anomaly detection - EMA baselines over the metric stream
//!
//! One exponential moving average per (metric key, dimension). The
//! comparison runs against the pre-observation baseline; the baseline
//! updates afterward, so an alert always reflects the deviation from what
//! was normal before the spike. The detector is a pure function over its
//! input stream: it owns no locks and never blocks ingestion (the engine
//! feeds it off the hot path).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pulse_core::record::{AnomalyAlert, MetricKind, MetricSample, Severity};
use std::collections::{HashMap, VecDeque};

/// What a series measures, which decides threshold and severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalySignal {
    /// Latencies alert at 3x baseline, HIGH
    Latency,
    /// Error rates alert at 2x baseline, MEDIUM
    ErrorRate,
}

/// EMA-baseline deviation detector
pub struct AnomalyDetector {
    alpha: f64,
    latency_factor: f64,
    error_rate_factor: f64,
    baselines: HashMap<String, f64>,
}

impl AnomalyDetector {
    pub fn new(alpha: f64, latency_factor: f64, error_rate_factor: f64) -> Self {
        Self {
            alpha,
            latency_factor,
            error_rate_factor,
            baselines: HashMap::new(),
        }
    }

    /// Classify a metric sample into a signal kind, if it is one the
    /// detector watches
    ///
    /// Histograms carry latencies; gauges named `*error_ratio*` carry the
    /// windowed error rates the engine derives per service.
    pub fn classify(sample: &MetricSample) -> Option<AnomalySignal> {
        match sample.kind {
            MetricKind::Histogram => Some(AnomalySignal::Latency),
            MetricKind::Gauge if sample.name.contains("error_ratio") => {
                Some(AnomalySignal::ErrorRate)
            }
            _ => None,
        }
    }

    /// Feed one observation; returns an alert if it deviates
    ///
    /// The first observation for a key seeds the baseline and never
    /// alerts. The baseline always updates, alert or not, after the
    /// comparison.
    pub fn observe(
        &mut self,
        signal: AnomalySignal,
        key: &str,
        observed: f64,
        now: DateTime<Utc>,
    ) -> Option<AnomalyAlert> {
        if !observed.is_finite() {
            return None;
        }
        let Some(&baseline) = self.baselines.get(key) else {
            self.baselines.insert(key.to_string(), observed);
            return None;
        };

        let (factor, severity, action) = match signal {
            AnomalySignal::Latency => (
                self.latency_factor,
                Severity::High,
                "scale up / investigate",
            ),
            AnomalySignal::ErrorRate => (
                self.error_rate_factor,
                Severity::Medium,
                "check recent deploys / dependencies",
            ),
        };

        // a zero baseline still alerts: the first error on a previously
        // clean series is exactly the spike worth reporting
        let alert = if observed > 0.0 && observed > factor * baseline {
            let deviation_ratio = if baseline > 0.0 {
                observed / baseline
            } else {
                f64::INFINITY
            };
            Some(AnomalyAlert {
                metric_key: key.to_string(),
                baseline,
                observed,
                deviation_ratio,
                severity,
                recommended_action: action.to_string(),
                detected_at: now,
            })
        } else {
            None
        };

        // update after the comparison: the EMA absorbs the spike but the
        // emitted alert measured against the old normal
        let updated = self.alpha * observed + (1.0 - self.alpha) * baseline;
        self.baselines.insert(key.to_string(), updated);

        alert
    }

    /// Feed a raw metric sample, classifying it first
    pub fn observe_sample(&mut self, sample: &MetricSample) -> Option<AnomalyAlert> {
        let signal = Self::classify(sample)?;
        self.observe(signal, &sample.series_key(), sample.value, sample.timestamp)
    }

    pub fn baseline(&self, key: &str) -> Option<f64> {
        self.baselines.get(key).copied()
    }
}

/// Bounded, queryable storage for emitted alerts
pub struct AlertBuffer {
    alerts: Mutex<VecDeque<AnomalyAlert>>,
    capacity: usize,
}

impl AlertBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, alert: AnomalyAlert) {
        let mut alerts = self.alerts.lock();
        if alerts.len() == self.capacity {
            alerts.pop_front();
        }
        alerts.push_back(alert);
    }

    /// Alerts detected at or after `since`, oldest first
    pub fn since(&self, since: DateTime<Utc>) -> Vec<AnomalyAlert> {
        self.alerts
            .lock()
            .iter()
            .filter(|a| a.detected_at >= since)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}
