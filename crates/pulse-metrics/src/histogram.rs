//! Rolling histogram window with nearest-rank percentiles
//!
//! Each label set gets a ring of the last K observations. Percentiles are
//! computed on read over a sorted copy; reads never mutate the window.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// The percentile set served on read
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
}

/// Ring buffer of the last K observations
#[derive(Debug)]
pub struct HistogramWindow {
    window: VecDeque<f64>,
    capacity: usize,
    total_count: u64,
    total_sum: f64,
}

impl HistogramWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            total_count: 0,
            total_sum: 0.0,
        }
    }

    /// Record one observation, evicting the oldest past capacity
    pub fn observe(&mut self, value: f64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.total_count += 1;
        self.total_sum += value;
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Lifetime observation count (not just the current window)
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Lifetime observation sum
    pub fn total_sum(&self) -> f64 {
        self.total_sum
    }

    /// Percentiles over the current window, nearest-rank on a sorted copy
    pub fn percentiles(&self) -> Option<Percentiles> {
        if self.window.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        Some(Percentiles {
            count: sorted.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p50: nearest_rank(&sorted, 50.0),
            p90: nearest_rank(&sorted, 90.0),
            p95: nearest_rank(&sorted, 95.0),
            p99: nearest_rank(&sorted, 99.0),
            p999: nearest_rank(&sorted, 99.9),
        })
    }
}

/// Nearest-rank percentile: the value at rank ceil(p/100 * n)
fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let n = sorted.len() as f64;
    let rank = (percentile / 100.0 * n).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles_on_known_distribution() {
        let mut h = HistogramWindow::new(1000);
        for v in 1..=100 {
            h.observe(v as f64);
        }
        let p = h.percentiles().unwrap();
        assert_eq!(p.count, 100);
        assert_eq!(p.p50, 50.0);
        assert_eq!(p.p90, 90.0);
        assert_eq!(p.p95, 95.0);
        assert_eq!(p.p99, 99.0);
        assert_eq!(p.p999, 100.0);
        assert_eq!(p.min, 1.0);
        assert_eq!(p.max, 100.0);
    }

    #[test]
    fn test_percentile_ordering_invariant() {
        // P50 <= P90 <= P95 <= P99 <= P99.9 must hold for any input
        let inputs: Vec<Vec<f64>> = vec![
            vec![5.0],
            vec![3.0, 3.0, 3.0],
            vec![9.0, 1.0, 4.0, 7.0, 2.0, 8.0, 0.5],
            (0..500).map(|i| ((i * 7919) % 101) as f64).collect(),
        ];
        for values in inputs {
            let mut h = HistogramWindow::new(1000);
            for v in &values {
                h.observe(*v);
            }
            let p = h.percentiles().unwrap();
            assert!(p.p50 <= p.p90, "p50 {} > p90 {}", p.p50, p.p90);
            assert!(p.p90 <= p.p95);
            assert!(p.p95 <= p.p99);
            assert!(p.p99 <= p.p999);
        }
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut h = HistogramWindow::new(3);
        for v in [1.0, 2.0, 3.0, 100.0] {
            h.observe(v);
        }
        assert_eq!(h.len(), 3);
        let p = h.percentiles().unwrap();
        assert_eq!(p.min, 2.0);
        assert_eq!(p.max, 100.0);
        assert_eq!(h.total_count(), 4);
    }

    #[test]
    fn test_read_does_not_mutate() {
        let mut h = HistogramWindow::new(10);
        h.observe(2.0);
        h.observe(1.0);
        let first = h.percentiles().unwrap();
        let second = h.percentiles().unwrap();
        assert_eq!(first, second);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn test_empty_window() {
        let h = HistogramWindow::new(10);
        assert!(h.percentiles().is_none());
        assert!(h.is_empty());
    }

    #[test]
    fn test_single_observation() {
        let mut h = HistogramWindow::new(10);
        h.observe(42.0);
        let p = h.percentiles().unwrap();
        assert_eq!(p.p50, 42.0);
        assert_eq!(p.p999, 42.0);
    }
}
