//! The engine facade
//!
//! One `ObservabilityEngine` instance owns every subsystem: span
//! lifecycle, trace assembly, sampling, metrics, correlation, anomaly
//! detection, and the dependency map. Host applications call the request
//! hooks and instrumentation methods; dashboards call the query surface.
//!
//! The instrumentation path is fail-open. A panic in any hook is caught
//! at this boundary, counted, and turned into a no-op; the host request
//! keeps running untraced.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use pulse_core::config::EngineConfig;
use pulse_core::context::TraceContext;
use pulse_core::error::{EngineError, EngineResult};
use pulse_core::ids::{SpanId, TraceId};
use pulse_core::kv::KvMap;
use pulse_core::record::{
    AnomalyAlert, CorrelatedLogEntry, LogLevel, MetricKind, MetricSample, ServiceDependencyEdge,
};
use pulse_core::span::{SpanKind, SpanStatus, SERVICE_TAG};
use pulse_core::trace::{RetainedTrace, Trace, TraceSummary};
use pulse_correlate::{
    critical_path, golden_signals, AlertBuffer, AnomalyDetector, CorrelatedView,
    CorrelationIndex, DependencyMapper, GoldenSignals, SignalWindow, TraceFilter,
};
use pulse_export::{trace_to_string, AlertSink};
use pulse_metrics::MetricsRegistry;
use pulse_trace::{
    extract, inject, Sampler, SamplerVerdict, SpanTracker, TraceAssembler,
};
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::stats::{EngineStats, EngineStatsSnapshot};

/// Histogram the request hooks feed with end-to-end durations
pub const REQUEST_DURATION_METRIC: &str = "pulse_request_duration_ms";
/// Counter the request hooks bump per finished request
pub const REQUEST_COUNT_METRIC: &str = "pulse_requests_total";
/// Derived gauge the anomaly detector watches for error-rate spikes
pub const ERROR_RATIO_METRIC: &str = "pulse_error_ratio";

/// Spans buffered per trace while waiting for the root
const MAX_SPANS_PER_TRACE: usize = 1_000;

/// Queue depth between the hot path and the anomaly task
const SAMPLE_QUEUE_DEPTH: usize = 1_024;

struct RuntimeState {
    shutdown_tx: broadcast::Sender<()>,
    sample_tx: mpsc::Sender<MetricSample>,
}

/// The unified observability engine
pub struct ObservabilityEngine {
    config: EngineConfig,
    sampler: Sampler,
    tracker: SpanTracker,
    assembler: TraceAssembler,
    metrics: MetricsRegistry,
    index: CorrelationIndex,
    detector: Mutex<AnomalyDetector>,
    alerts: AlertBuffer,
    depmap: DependencyMapper,
    sinks: Vec<Arc<dyn AlertSink>>,
    stats: EngineStats,

    /// Span ids opened by `on_request_start`; these finalize their trace
    /// even when their parent lives in another process
    hook_roots: Mutex<HashSet<SpanId>>,

    runtime: Mutex<Option<RuntimeState>>,
}

impl ObservabilityEngine {
    pub fn new(config: EngineConfig) -> Self {
        let limits = &config.limits;
        Self {
            sampler: Sampler::new(config.sampling.clone()),
            tracker: SpanTracker::new(limits.max_active_spans),
            assembler: TraceAssembler::new(MAX_SPANS_PER_TRACE),
            metrics: MetricsRegistry::new(config.metrics.histogram_window),
            index: CorrelationIndex::new(
                limits.trace_capacity,
                limits.metric_capacity,
                limits.log_capacity,
                limits.side_index_per_trace,
            ),
            detector: Mutex::new(AnomalyDetector::new(
                config.anomaly.alpha,
                config.anomaly.latency_factor,
                config.anomaly.error_rate_factor,
            )),
            alerts: AlertBuffer::new(config.anomaly.alert_capacity),
            depmap: DependencyMapper::new(),
            sinks: Vec::new(),
            stats: EngineStats::new(),
            hook_roots: Mutex::new(HashSet::new()),
            runtime: Mutex::new(None),
            config,
        }
    }

    /// Register a destination for anomaly alerts
    ///
    /// Sinks are driven by the background anomaly task; call before
    /// [`start`](Self::start).
    pub fn add_alert_sink(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    /// Start the background tasks: staleness sweep, adaptive sampler
    /// adjustment, and anomaly detection
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let (sample_tx, mut sample_rx) = mpsc::channel::<MetricSample>(SAMPLE_QUEUE_DEPTH);

        // staleness sweep
        let engine = Arc::clone(self);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let sweep_every =
            std::time::Duration::from_secs(self.config.limits.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.sweep_now();
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("sweep task stopped");
                        break;
                    }
                }
            }
        });

        // adaptive sampler control loop
        if let Some(adjust_every) = self.sampler.adjust_interval() {
            let engine = Arc::clone(self);
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(adjust_every);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            engine.sampler.adjust();
                        }
                        _ = shutdown_rx.recv() => {
                            debug!("adaptive sampler task stopped");
                            break;
                        }
                    }
                }
            });
        }

        // anomaly detection and alert delivery
        let engine = Arc::clone(self);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = sample_rx.recv() => {
                        let Some(sample) = maybe else { break };
                        if let Some(alert) = engine.observe_for_anomaly(&sample) {
                            for sink in &engine.sinks {
                                if let Err(e) = sink.deliver(&alert).await {
                                    warn!("alert sink {} failed: {}", sink.name(), e);
                                }
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("anomaly task stopped");
                        break;
                    }
                }
            }
        });

        *runtime = Some(RuntimeState {
            shutdown_tx,
            sample_tx,
        });
        info!(
            "engine started (service {}, {} alert sinks)",
            self.config.engine.service_name,
            self.sinks.len()
        );
        Ok(())
    }

    /// Stop the background tasks; buffered data stays queryable
    pub async fn shutdown(&self) -> EngineResult<()> {
        let state = self.runtime.lock().take().ok_or(EngineError::NotRunning)?;
        let _ = state.shutdown_tx.send(());
        info!("engine shut down");
        Ok(())
    }

    // ---- request hooks ------------------------------------------------

    /// Inbound hook: continue the caller's trace or start a new one
    ///
    /// Always returns a usable context. A malformed `traceparent` starts
    /// a fresh root instead of failing the request.
    pub fn on_request_start(
        &self,
        headers: &HashMap<String, String>,
        name: &str,
    ) -> TraceContext {
        self.guarded("on_request_start", || {
            self.request_start_inner(headers, name)
        })
        .unwrap_or_else(|| TraceContext::new_root(false))
    }

    fn request_start_inner(&self, headers: &HashMap<String, String>, name: &str) -> TraceContext {
        let ctx = match extract(headers) {
            Some(parent) => parent.child(),
            None => TraceContext::new_root(self.sampler.head_decision()),
        };

        if self.tracker.open(&ctx, name, SpanKind::Server, Utc::now()) {
            self.stats.spans_started.fetch_add(1, Ordering::Relaxed);
            self.tracker
                .set_tag(ctx.span_id, SERVICE_TAG, &self.config.engine.service_name);
            self.hook_roots.lock().insert(ctx.span_id);
        } else {
            self.stats.spans_dropped.fetch_add(1, Ordering::Relaxed);
        }
        ctx
    }

    /// Inbound hook: finalize the request span and its trace
    ///
    /// Status codes 500 and above mark the span as errored. Ending an
    /// unknown or already-ended span is a no-op.
    pub fn on_request_end(&self, ctx: &TraceContext, status_code: u16) {
        self.guarded("on_request_end", || {
            self.request_end_inner(ctx, status_code)
        });
    }

    fn request_end_inner(&self, ctx: &TraceContext, status_code: u16) {
        let now = Utc::now();
        let status = if status_code >= 500 {
            SpanStatus::error(format!("HTTP {}", status_code))
        } else {
            SpanStatus::Ok
        };

        let Some(span) = self.tracker.end(ctx.span_id, status, now) else {
            return;
        };
        self.stats.spans_finished.fetch_add(1, Ordering::Relaxed);

        let service = span
            .service()
            .unwrap_or(&self.config.engine.service_name)
            .to_string();
        let labels = pulse_core::kv!("service" => service.as_str());

        if let Some(ms) = span.duration_ms() {
            self.record_sample(self.metrics.observe_histogram(
                REQUEST_DURATION_METRIC,
                labels.clone(),
                ms as f64,
                Some(ctx),
            ));
        }
        self.record_sample(self.metrics.add_counter(
            REQUEST_COUNT_METRIC,
            labels.clone(),
            1.0,
            Some(ctx),
        ));

        self.finish_trace_with(span, ctx.sampled, now);

        // derived error-rate gauge over the last minute, watched by the
        // anomaly detector
        let (total, errors) = self.index.window_tally(&service, now - Duration::minutes(1));
        if total > 0 {
            self.record_sample(self.metrics.set_gauge(
                ERROR_RATIO_METRIC,
                labels,
                errors as f64 / total as f64,
                None,
            ));
        }
    }

    // ---- instrumentation API -------------------------------------------

    /// Open a child span under `parent`
    ///
    /// The returned context identifies the new span for `end_span` and
    /// for outbound header injection.
    pub fn start_span(&self, parent: &TraceContext, name: &str, kind: SpanKind) -> TraceContext {
        self.guarded("start_span", || {
            let ctx = parent.child();
            if self.tracker.open(&ctx, name, kind, Utc::now()) {
                self.stats.spans_started.fetch_add(1, Ordering::Relaxed);
                self.tracker
                    .set_tag(ctx.span_id, SERVICE_TAG, &self.config.engine.service_name);
            } else {
                self.stats.spans_dropped.fetch_add(1, Ordering::Relaxed);
            }
            ctx
        })
        .unwrap_or_else(|| parent.child())
    }

    /// Finalize a span opened with `start_span`
    pub fn end_span(&self, ctx: &TraceContext, status: SpanStatus) {
        self.guarded("end_span", || {
            let now = Utc::now();
            let Some(span) = self.tracker.end(ctx.span_id, status, now) else {
                return;
            };
            self.stats.spans_finished.fetch_add(1, Ordering::Relaxed);
            self.finish_trace_with(span, ctx.sampled, now);
        });
    }

    /// Set a tag on an open span; a no-op once the span has ended
    pub fn set_tag(&self, ctx: &TraceContext, key: &str, value: &str) {
        self.guarded("set_tag", || {
            self.tracker.set_tag(ctx.span_id, key, value);
        });
    }

    /// Attach a timestamped event to an open span
    pub fn add_event(&self, ctx: &TraceContext, name: &str, attributes: KvMap) {
        self.guarded("add_event", || {
            self.tracker.add_event(ctx.span_id, name, attributes, Utc::now());
        });
    }

    /// Headers to attach to an outbound request made under `ctx`
    pub fn inject_headers(&self, ctx: &TraceContext) -> Vec<(String, String)> {
        self.guarded("inject_headers", || inject(ctx))
            .unwrap_or_default()
    }

    /// Increment a counter; `ctx` links the sample to its trace
    pub fn incr_counter(
        &self,
        name: &str,
        labels: KvMap,
        delta: f64,
        ctx: Option<&TraceContext>,
    ) {
        self.guarded("incr_counter", || {
            self.record_sample(self.metrics.add_counter(name, labels, delta, ctx));
        });
    }

    /// Set a gauge to an absolute value
    pub fn set_gauge(&self, name: &str, labels: KvMap, value: f64, ctx: Option<&TraceContext>) {
        self.guarded("set_gauge", || {
            self.record_sample(self.metrics.set_gauge(name, labels, value, ctx));
        });
    }

    /// Record a histogram observation
    pub fn observe_histogram(
        &self,
        name: &str,
        labels: KvMap,
        value: f64,
        ctx: Option<&TraceContext>,
    ) {
        self.guarded("observe_histogram", || {
            self.record_sample(self.metrics.observe_histogram(name, labels, value, ctx));
        });
    }

    /// Record a sample of any kind; dispatches to the typed methods
    pub fn record_metric(
        &self,
        name: &str,
        kind: MetricKind,
        value: f64,
        labels: KvMap,
        ctx: Option<&TraceContext>,
    ) {
        match kind {
            MetricKind::Counter => self.incr_counter(name, labels, value, ctx),
            MetricKind::Gauge => self.set_gauge(name, labels, value, ctx),
            MetricKind::Histogram => self.observe_histogram(name, labels, value, ctx),
        }
    }

    /// Record a log line, correlated to `ctx` when present
    pub fn record_log(&self, level: LogLevel, message: &str, ctx: Option<&TraceContext>) {
        self.guarded("record_log", || {
            self.index.record_log(CorrelatedLogEntry {
                timestamp: Utc::now(),
                level,
                message: message.to_string(),
                trace_id: ctx.map(|c| c.trace_id),
                span_id: ctx.map(|c| c.span_id),
            });
            self.stats.logs_recorded.fetch_add(1, Ordering::Relaxed);
        });
    }

    // ---- query surface -------------------------------------------------

    /// Golden signals for one service over a lookback window
    pub fn get_golden_signals(&self, service: &str, window: SignalWindow) -> GoldenSignals {
        golden_signals(
            service,
            window,
            &self.index,
            &self.metrics,
            self.tracker.open_count_for_service(service),
            Utc::now(),
        )
    }

    /// A retained trace by id, full or aggregate
    pub fn get_trace(&self, trace_id: TraceId) -> Option<RetainedTrace> {
        self.index.get_trace(trace_id)
    }

    /// Trace plus every correlated log and metric still retained
    pub fn get_correlated(&self, trace_id: TraceId) -> CorrelatedView {
        self.index.get_correlated(trace_id)
    }

    /// Trace summaries matching a filter, newest first
    pub fn search_traces(&self, filter: &TraceFilter) -> Vec<TraceSummary> {
        self.index.search(filter)
    }

    /// Anomaly alerts detected at or after `since`
    pub fn get_anomalies(&self, since: DateTime<Utc>) -> Vec<AnomalyAlert> {
        self.alerts.since(since)
    }

    /// The cumulative service call graph
    pub fn get_dependency_graph(&self) -> Vec<ServiceDependencyEdge> {
        self.depmap.graph()
    }

    /// Span ids along the slowest root-to-leaf path of a fully retained
    /// trace; `None` for unknown or aggregate-only traces
    pub fn get_critical_path(&self, trace_id: TraceId) -> Option<Vec<SpanId>> {
        match self.index.get_trace(trace_id)? {
            RetainedTrace::Full(trace) => Some(critical_path(&trace)),
            RetainedTrace::Aggregate(_) => None,
        }
    }

    /// Prometheus exposition text, engine self-metrics included
    pub fn render_prometheus(&self) -> String {
        self.publish_self_metrics();
        pulse_export::render_prometheus(&self.metrics.snapshot())
    }

    /// One retained trace as a pretty-printed JSON document
    pub fn export_trace_json(&self, trace_id: TraceId) -> EngineResult<Option<String>> {
        let Some(trace) = self.index.get_trace(trace_id) else {
            return Ok(None);
        };
        let doc = trace_to_string(&trace).map_err(anyhow::Error::new)?;
        Ok(Some(doc))
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn open_span_count(&self) -> usize {
        self.tracker.open_count()
    }

    /// Current head-sampling probability
    pub fn sampling_probability(&self) -> f64 {
        self.sampler.current_probability()
    }

    // ---- internals -----------------------------------------------------

    /// Run one staleness sweep immediately
    ///
    /// Force-closes spans open past the staleness bound and flushes
    /// rootless assemblies as partial traces. The background sweep task
    /// calls this on its interval.
    pub fn sweep_now(&self) {
        let now = Utc::now();
        let stale_after = Duration::seconds(self.config.limits.stale_after_secs as i64);

        let abandoned = self.tracker.sweep_stale(stale_after, now);
        for span in abandoned {
            self.stats.spans_abandoned.fetch_add(1, Ordering::Relaxed);
            let is_local_root = self.hook_roots.lock().remove(&span.span_id);
            if let Some(trace) = self.assembler.add(span, is_local_root, now) {
                self.complete_trace(trace, false);
            }
        }

        for trace in self.assembler.sweep_stale(stale_after, now) {
            self.complete_trace(trace, false);
        }
    }

    fn finish_trace_with(&self, span: pulse_core::span::Span, head_sampled: bool, now: DateTime<Utc>) {
        let is_local_root = self.hook_roots.lock().remove(&span.span_id);
        if let Some(trace) = self.assembler.add(span, is_local_root, now) {
            self.complete_trace(trace, head_sampled);
        }
    }

    fn complete_trace(&self, trace: Trace, head_sampled: bool) {
        self.depmap.record_trace(&trace);
        let retained = match self.sampler.verdict(&trace, head_sampled) {
            SamplerVerdict::RetainFull => {
                self.stats
                    .traces_retained_full
                    .fetch_add(1, Ordering::Relaxed);
                RetainedTrace::Full(trace)
            }
            SamplerVerdict::AggregateOnly => {
                self.stats
                    .traces_retained_aggregate
                    .fetch_add(1, Ordering::Relaxed);
                RetainedTrace::Aggregate(trace.summarize())
            }
        };
        self.index.record_trace(retained);
    }

    /// Index a recorded sample and hand it to the anomaly detector
    fn record_sample(&self, sample: Option<MetricSample>) {
        let Some(sample) = sample else { return };
        self.stats
            .metric_samples_recorded
            .fetch_add(1, Ordering::Relaxed);
        self.index.record_metric(sample.clone());
        self.dispatch_sample(sample);
    }

    /// Queue the sample for the anomaly task, or observe inline when the
    /// engine is not running
    fn dispatch_sample(&self, sample: MetricSample) {
        let runtime = self.runtime.lock();
        if let Some(state) = runtime.as_ref() {
            if state.sample_tx.try_send(sample).is_err() {
                debug!("anomaly queue full, sample dropped");
            }
            return;
        }
        drop(runtime);
        self.observe_for_anomaly(&sample);
    }

    fn observe_for_anomaly(&self, sample: &MetricSample) -> Option<AnomalyAlert> {
        let alert = self.detector.lock().observe_sample(sample)?;
        self.stats.alerts_emitted.fetch_add(1, Ordering::Relaxed);
        warn!(
            "anomaly: {} at {:.3} ({:.1}x baseline {:.3})",
            alert.metric_key, alert.observed, alert.deviation_ratio, alert.baseline
        );
        self.alerts.push(alert.clone());
        Some(alert)
    }

    /// Panic boundary for the instrumentation path
    fn guarded<T>(&self, what: &str, f: impl FnOnce() -> T) -> Option<T> {
        match std::panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Some(value),
            Err(_) => {
                self.stats.guard_trips.fetch_add(1, Ordering::Relaxed);
                error!("panic caught in {}, continuing untraced", what);
                None
            }
        }
    }

    /// Publish the self-accounting counters as gauges so they ride the
    /// normal exposition path
    fn publish_self_metrics(&self) {
        let snap = self.stats.snapshot();
        let pairs = [
            ("pulse_engine_spans_started", snap.spans_started),
            ("pulse_engine_spans_finished", snap.spans_finished),
            ("pulse_engine_spans_dropped", snap.spans_dropped),
            ("pulse_engine_spans_abandoned", snap.spans_abandoned),
            ("pulse_engine_traces_retained_full", snap.traces_retained_full),
            (
                "pulse_engine_traces_retained_aggregate",
                snap.traces_retained_aggregate,
            ),
            ("pulse_engine_alerts_emitted", snap.alerts_emitted),
            ("pulse_engine_guard_trips", snap.guard_trips),
        ];
        for (name, value) in pairs {
            self.metrics
                .set_gauge(name, KvMap::new(), value as f64, None);
        }
        self.metrics.set_gauge(
            "pulse_engine_open_spans",
            KvMap::new(),
            self.tracker.open_count() as f64,
            None,
        );
        self.metrics.set_gauge(
            "pulse_engine_pending_assemblies",
            KvMap::new(),
            self.assembler.pending_count() as f64,
            None,
        );
    }
}
