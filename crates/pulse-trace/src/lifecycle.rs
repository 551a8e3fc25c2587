//! Span lifecycle - the active registry and staleness sweep
//!
//! Open spans live in a sharded registry keyed by span id. A span moves
//! through exactly one `open -> closed` transition; mutations against a
//! missing or already-closed span are logged at debug level and ignored so
//! the instrumented caller never fails because of its own telemetry.
//!
//! The registry is bounded: once `max_active` spans are open, further
//! spans run untraced (fail-open) and a drop counter increments.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use pulse_core::context::TraceContext;
use pulse_core::ids::SpanId;
use pulse_core::kv::KvMap;
use pulse_core::span::{Span, SpanEvent, SpanKind, SpanStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

const SHARD_COUNT: usize = 16;

/// Status message applied to spans force-closed by the sweep
pub const ABANDONED_MESSAGE: &str = "abandoned";

/// Sharded registry of open spans
pub struct SpanTracker {
    shards: Vec<Mutex<HashMap<SpanId, Span>>>,
    open_count: AtomicUsize,
    max_active: usize,
    dropped: AtomicU64,
}

impl SpanTracker {
    pub fn new(max_active: usize) -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
            open_count: AtomicUsize::new(0),
            max_active,
            dropped: AtomicU64::new(0),
        }
    }

    fn shard(&self, span_id: SpanId) -> &Mutex<HashMap<SpanId, Span>> {
        &self.shards[(span_id.0 as usize) % SHARD_COUNT]
    }

    /// Register an open span for the hop described by `ctx`
    ///
    /// Returns false when the in-flight bound is hit; the request still
    /// executes, it just leaves no span behind.
    pub fn open(&self, ctx: &TraceContext, name: &str, kind: SpanKind, now: DateTime<Utc>) -> bool {
        if self.open_count.load(Ordering::Relaxed) >= self.max_active {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                "active span registry full ({}), running untraced: {}",
                self.max_active, name
            );
            return false;
        }

        let span = Span::open(
            ctx.trace_id,
            ctx.span_id,
            ctx.parent_span_id,
            name,
            kind,
            now,
        );
        let mut shard = self.shard(ctx.span_id).lock();
        if shard.insert(ctx.span_id, span).is_some() {
            warn!("span id collision in active registry: {}", ctx.span_id);
            return true;
        }
        drop(shard);
        self.open_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Set a tag on an open span; no-op (debug log) if missing or closed
    pub fn set_tag(&self, span_id: SpanId, key: &str, value: &str) {
        let mut shard = self.shard(span_id).lock();
        match shard.get_mut(&span_id) {
            Some(span) => span.tags.insert(key, value),
            None => debug!("set_tag on unknown or closed span {}", span_id),
        }
    }

    /// Append an event to an open span; no-op (debug log) if missing or closed
    pub fn add_event(&self, span_id: SpanId, name: &str, attributes: KvMap, now: DateTime<Utc>) {
        let mut shard = self.shard(span_id).lock();
        match shard.get_mut(&span_id) {
            Some(span) => span.events.push(SpanEvent {
                timestamp: now,
                name: name.to_string(),
                attributes,
            }),
            None => debug!("add_event on unknown or closed span {}", span_id),
        }
    }

    /// Finalize a span and remove it from the registry
    ///
    /// Returns the finished span, or `None` (warn log) if the span was
    /// never registered or was already closed. Closing twice is an
    /// invariant violation on the caller's side, never an error here.
    pub fn end(&self, span_id: SpanId, status: SpanStatus, now: DateTime<Utc>) -> Option<Span> {
        let removed = self.shard(span_id).lock().remove(&span_id);
        match removed {
            Some(mut span) => {
                span.finish(status, now);
                self.open_count.fetch_sub(1, Ordering::Relaxed);
                Some(span)
            }
            None => {
                warn!("end_span on unknown or already-closed span {}", span_id);
                None
            }
        }
    }

    /// Force-close spans open longer than `stale_after`
    ///
    /// Returns the closed spans so the caller can route them through the
    /// normal completion path. Status is ERROR("abandoned"), end time is
    /// the sweep time.
    pub fn sweep_stale(&self, stale_after: Duration, now: DateTime<Utc>) -> Vec<Span> {
        let cutoff = now - stale_after;
        let mut swept = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock();
            let stale_ids: Vec<SpanId> = shard
                .values()
                .filter(|s| s.start_time <= cutoff)
                .map(|s| s.span_id)
                .collect();
            for id in stale_ids {
                if let Some(mut span) = shard.remove(&id) {
                    span.finish(SpanStatus::error(ABANDONED_MESSAGE), now);
                    self.open_count.fetch_sub(1, Ordering::Relaxed);
                    swept.push(span);
                }
            }
        }
        if !swept.is_empty() {
            warn!("staleness sweep force-closed {} abandoned spans", swept.len());
        }
        swept
    }

    /// Number of currently open spans
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Relaxed)
    }

    /// Open spans tagged with the given service
    pub fn open_count_for_service(&self, service: &str) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .values()
                    .filter(|s| s.service() == Some(service))
                    .count()
            })
            .sum()
    }

    /// Spans dropped because the registry was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SpanTracker {
        SpanTracker::new(100)
    }

    #[test]
    fn test_open_and_end_span() {
        let t = tracker();
        let ctx = TraceContext::new_root(true);
        assert!(t.open(&ctx, "op", SpanKind::Server, Utc::now()));
        assert_eq!(t.open_count(), 1);

        let span = t.end(ctx.span_id, SpanStatus::Ok, Utc::now()).unwrap();
        assert_eq!(span.span_id, ctx.span_id);
        assert!(!span.is_open());
        assert_eq!(t.open_count(), 0);
    }

    #[test]
    fn test_end_twice_is_noop() {
        let t = tracker();
        let ctx = TraceContext::new_root(true);
        t.open(&ctx, "op", SpanKind::Internal, Utc::now());

        assert!(t.end(ctx.span_id, SpanStatus::Ok, Utc::now()).is_some());
        assert!(t.end(ctx.span_id, SpanStatus::Ok, Utc::now()).is_none());
        assert_eq!(t.open_count(), 0);
    }

    #[test]
    fn test_mutations_on_closed_span_ignored() {
        let t = tracker();
        let ctx = TraceContext::new_root(true);
        t.open(&ctx, "op", SpanKind::Internal, Utc::now());
        t.end(ctx.span_id, SpanStatus::Ok, Utc::now());

        // must not panic or resurrect the span
        t.set_tag(ctx.span_id, "k", "v");
        t.add_event(ctx.span_id, "late", KvMap::new(), Utc::now());
        assert_eq!(t.open_count(), 0);
    }

    #[test]
    fn test_tags_and_events_applied_while_open() {
        let t = tracker();
        let ctx = TraceContext::new_root(true);
        t.open(&ctx, "op", SpanKind::Client, Utc::now());
        t.set_tag(ctx.span_id, "service.name", "db");
        t.add_event(ctx.span_id, "query_start", KvMap::new(), Utc::now());

        let span = t.end(ctx.span_id, SpanStatus::Ok, Utc::now()).unwrap();
        assert_eq!(span.service(), Some("db"));
        assert_eq!(span.events.len(), 1);
        assert_eq!(span.events[0].name, "query_start");
    }

    #[test]
    fn test_in_flight_bound_fails_open() {
        let t = SpanTracker::new(2);
        let a = TraceContext::new_root(true);
        let b = TraceContext::new_root(true);
        let c = TraceContext::new_root(true);
        assert!(t.open(&a, "a", SpanKind::Server, Utc::now()));
        assert!(t.open(&b, "b", SpanKind::Server, Utc::now()));
        assert!(!t.open(&c, "c", SpanKind::Server, Utc::now()));
        assert_eq!(t.open_count(), 2);
        assert_eq!(t.dropped_count(), 1);
    }

    #[test]
    fn test_sweep_closes_only_stale_spans() {
        let t = tracker();
        let old = TraceContext::new_root(true);
        let fresh = TraceContext::new_root(true);
        let now = Utc::now();
        t.open(&old, "old", SpanKind::Server, now - Duration::minutes(10));
        t.open(&fresh, "fresh", SpanKind::Server, now);

        let swept = t.sweep_stale(Duration::minutes(5), now);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].name, "old");
        assert_eq!(swept[0].status, SpanStatus::error(ABANDONED_MESSAGE));
        assert_eq!(swept[0].end_time, Some(now));
        assert_eq!(t.open_count(), 1);
    }

    #[test]
    fn test_open_count_for_service() {
        let t = tracker();
        let a = TraceContext::new_root(true);
        let b = TraceContext::new_root(true);
        t.open(&a, "a", SpanKind::Server, Utc::now());
        t.open(&b, "b", SpanKind::Server, Utc::now());
        t.set_tag(a.span_id, "service.name", "api");
        assert_eq!(t.open_count_for_service("api"), 1);
        assert_eq!(t.open_count_for_service("other"), 0);
    }
}
