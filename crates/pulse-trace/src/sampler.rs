//! Sampling strategies - head, tail, and adaptive
//!
//! The sampler decides which completed traces keep full span detail and
//! which are condensed to aggregate-only summaries. Decisions never fail
//! the request path: on any internal inconsistency the answer is "not
//! sampled" (fail closed on cost, fail open on correctness).

use chrono::Duration;
use parking_lot::Mutex;
use pulse_core::config::SamplingSettings;
use pulse_core::trace::Trace;
use rand::Rng;
use tracing::{debug, warn};

/// Retention decision for a completed trace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerVerdict {
    /// Keep full span detail
    RetainFull,
    /// Keep aggregate counts only
    AggregateOnly,
}

struct AdaptiveState {
    probability: f64,
    roots_started: u64,
    traces_retained: u64,
}

/// Interchangeable sampling strategy, selected by configuration
pub struct Sampler {
    settings: SamplingSettings,
    adaptive: Mutex<AdaptiveState>,
}

impl Sampler {
    pub fn new(settings: SamplingSettings) -> Self {
        let initial_p = match &settings {
            SamplingSettings::Head { probability } => *probability,
            SamplingSettings::Adaptive { p_max, .. } => *p_max,
            SamplingSettings::Tail { .. } => 0.0,
        };
        Self {
            settings,
            adaptive: Mutex::new(AdaptiveState {
                probability: initial_p,
                roots_started: 0,
                traces_retained: 0,
            }),
        }
    }

    /// Head decision for a locally-started root span
    ///
    /// Under tail sampling the propagated bit starts false: retention is
    /// decided at completion, and descendants that never report back here
    /// should not be forced into retention by the head bit.
    pub fn head_decision(&self) -> bool {
        let sampled = match &self.settings {
            SamplingSettings::Head { probability } => {
                rand::thread_rng().gen::<f64>() < *probability
            }
            SamplingSettings::Adaptive { .. } => {
                let p = self.adaptive.lock().probability;
                rand::thread_rng().gen::<f64>() < p
            }
            SamplingSettings::Tail { .. } => false,
        };
        self.adaptive.lock().roots_started += 1;
        sampled
    }

    /// Retention verdict for a completed trace
    ///
    /// `head_sampled` is the propagated bit from the trace's root context.
    pub fn verdict(&self, trace: &Trace, head_sampled: bool) -> SamplerVerdict {
        let verdict = match &self.settings {
            SamplingSettings::Head { .. } | SamplingSettings::Adaptive { .. } => {
                if head_sampled {
                    SamplerVerdict::RetainFull
                } else {
                    SamplerVerdict::AggregateOnly
                }
            }
            SamplingSettings::Tail { slow_threshold_ms } => {
                let slow = trace
                    .duration()
                    .map(|d| d > Duration::milliseconds(*slow_threshold_ms as i64))
                    .unwrap_or(false);
                if trace.has_error() || slow || head_sampled {
                    SamplerVerdict::RetainFull
                } else {
                    SamplerVerdict::AggregateOnly
                }
            }
        };
        if verdict == SamplerVerdict::RetainFull {
            self.adaptive.lock().traces_retained += 1;
        }
        verdict
    }

    /// Adjust the adaptive probability toward the target retained rate
    ///
    /// `p_new = p_old * (target / observed)`, clamped to `[p_min, p_max]`.
    /// A no-op for the head and tail strategies and for idle intervals.
    /// Counters reset each call.
    pub fn adjust(&self) {
        let SamplingSettings::Adaptive {
            target_rate,
            p_min,
            p_max,
            ..
        } = &self.settings
        else {
            return;
        };

        let mut state = self.adaptive.lock();
        if state.roots_started == 0 {
            return;
        }
        // at least one retained trace in the denominator keeps the
        // correction finite after an all-discarded interval
        let observed = (state.traces_retained.max(1)) as f64 / state.roots_started as f64;
        let old_p = state.probability;
        state.probability = (old_p * (target_rate / observed)).clamp(*p_min, *p_max);
        if state.probability != old_p {
            debug!(
                "adaptive sampler: observed rate {:.5}, probability {:.5} -> {:.5}",
                observed, old_p, state.probability
            );
        }
        if state.probability.is_nan() {
            warn!("adaptive sampler produced NaN probability, resetting to p_min");
            state.probability = *p_min;
        }
        state.roots_started = 0;
        state.traces_retained = 0;
    }

    /// Current head probability (1.0 means "not probabilistic")
    pub fn current_probability(&self) -> f64 {
        self.adaptive.lock().probability
    }

    /// Adjustment interval for the adaptive control loop, if configured
    pub fn adjust_interval(&self) -> Option<std::time::Duration> {
        match &self.settings {
            SamplingSettings::Adaptive { interval_secs, .. } => {
                Some(std::time::Duration::from_secs(*interval_secs))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_core::ids::{SpanId, TraceId};
    use pulse_core::span::{Span, SpanKind, SpanStatus};

    fn trace_with(duration_ms: i64, error: bool) -> Trace {
        let trace_id = TraceId::generate();
        let mut root = Span::open(
            trace_id,
            SpanId::generate(),
            None,
            "root",
            SpanKind::Server,
            Utc::now(),
        );
        let status = if error {
            SpanStatus::error("boom")
        } else {
            SpanStatus::Ok
        };
        root.finish(status, root.start_time + Duration::milliseconds(duration_ms));
        Trace::new(trace_id, vec![root])
    }

    #[test]
    fn test_head_zero_and_one_probabilities() {
        let never = Sampler::new(SamplingSettings::Head { probability: 0.0 });
        let always = Sampler::new(SamplingSettings::Head { probability: 1.0 });
        for _ in 0..50 {
            assert!(!never.head_decision());
            assert!(always.head_decision());
        }
    }

    #[test]
    fn test_head_verdict_follows_propagated_bit() {
        let sampler = Sampler::new(SamplingSettings::Head { probability: 0.5 });
        let trace = trace_with(10, false);
        assert_eq!(sampler.verdict(&trace, true), SamplerVerdict::RetainFull);
        assert_eq!(
            sampler.verdict(&trace, false),
            SamplerVerdict::AggregateOnly
        );
    }

    #[test]
    fn test_tail_retains_errors_and_slow_traces() {
        let sampler = Sampler::new(SamplingSettings::Tail {
            slow_threshold_ms: 100,
        });

        assert_eq!(
            sampler.verdict(&trace_with(10, true), false),
            SamplerVerdict::RetainFull
        );
        assert_eq!(
            sampler.verdict(&trace_with(500, false), false),
            SamplerVerdict::RetainFull
        );
        assert_eq!(
            sampler.verdict(&trace_with(10, false), true),
            SamplerVerdict::RetainFull
        );
        // fast, clean, unsampled: aggregate only
        assert_eq!(
            sampler.verdict(&trace_with(10, false), false),
            SamplerVerdict::AggregateOnly
        );
    }

    #[test]
    fn test_tail_head_decision_is_false() {
        let sampler = Sampler::new(SamplingSettings::Tail {
            slow_threshold_ms: 100,
        });
        assert!(!sampler.head_decision());
    }

    #[test]
    fn test_adaptive_converges_downward() {
        let sampler = Sampler::new(SamplingSettings::Adaptive {
            target_rate: 0.01,
            p_min: 0.001,
            p_max: 1.0,
            interval_secs: 60,
        });
        // interval observed 100% retention against a 1% target
        let trace = trace_with(10, false);
        for _ in 0..100 {
            sampler.head_decision();
            sampler.verdict(&trace, true);
        }
        let before = sampler.current_probability();
        sampler.adjust();
        let after = sampler.current_probability();
        assert!(after < before);
        assert!(after >= 0.001);
    }

    #[test]
    fn test_adaptive_clamped_to_bounds() {
        let sampler = Sampler::new(SamplingSettings::Adaptive {
            target_rate: 0.9,
            p_min: 0.05,
            p_max: 0.2,
            interval_secs: 60,
        });
        // very low observed retention pushes p upward, capped at p_max
        for _ in 0..1000 {
            sampler.head_decision();
        }
        sampler.verdict(&trace_with(10, false), true);
        sampler.adjust();
        assert!(sampler.current_probability() <= 0.2);
        assert!(sampler.current_probability() >= 0.05);
    }

    #[test]
    fn test_adjust_noop_for_head_strategy() {
        let sampler = Sampler::new(SamplingSettings::Head { probability: 0.3 });
        sampler.adjust();
        assert_eq!(sampler.current_probability(), 0.3);
        assert!(sampler.adjust_interval().is_none());
    }
}
