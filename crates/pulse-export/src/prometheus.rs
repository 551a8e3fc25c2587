//! Prometheus text exposition
//!
//! Renders a registry snapshot in the text format scrapers expect. One
//! `# TYPE` comment per metric name, histogram percentiles as
//! `quantile`-labeled gauge lines plus `_count` and `_sum`.

use pulse_core::kv::KvMap;
use pulse_metrics::SeriesSnapshot;
use std::fmt::Write;

/// Render a full snapshot as Prometheus exposition text
pub fn render_prometheus(snapshots: &[SeriesSnapshot]) -> String {
    let mut out = String::new();
    let mut last_name: Option<&str> = None;

    for snapshot in snapshots {
        let (name, kind) = match snapshot {
            SeriesSnapshot::Counter { name, .. } => (name.as_str(), "counter"),
            SeriesSnapshot::Gauge { name, .. } => (name.as_str(), "gauge"),
            SeriesSnapshot::Histogram { name, .. } => (name.as_str(), "summary"),
        };
        // snapshots arrive sorted by name, so one TYPE line per series name
        if last_name != Some(name) {
            let _ = writeln!(out, "# TYPE {} {}", sanitize_name(name), kind);
            last_name = Some(name);
        }

        match snapshot {
            SeriesSnapshot::Counter {
                name,
                labels,
                value,
            }
            | SeriesSnapshot::Gauge {
                name,
                labels,
                value,
            } => {
                let _ = writeln!(
                    out,
                    "{}{} {}",
                    sanitize_name(name),
                    render_labels(labels, None),
                    format_value(*value)
                );
            }
            SeriesSnapshot::Histogram {
                name,
                labels,
                total_count,
                total_sum,
                percentiles,
            } => {
                let name = sanitize_name(name);
                if let Some(p) = percentiles {
                    for (q, v) in [
                        ("0.5", p.p50),
                        ("0.9", p.p90),
                        ("0.95", p.p95),
                        ("0.99", p.p99),
                        ("0.999", p.p999),
                    ] {
                        let _ = writeln!(
                            out,
                            "{}{} {}",
                            name,
                            render_labels(labels, Some(q)),
                            format_value(v)
                        );
                    }
                }
                let _ = writeln!(
                    out,
                    "{}_count{} {}",
                    name,
                    render_labels(labels, None),
                    total_count
                );
                let _ = writeln!(
                    out,
                    "{}_sum{} {}",
                    name,
                    render_labels(labels, None),
                    format_value(*total_sum)
                );
            }
        }
    }

    out
}

/// `{k="v",...}`, with an optional trailing quantile label; empty string
/// when there is nothing to render
fn render_labels(labels: &KvMap, quantile: Option<&str>) -> String {
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", sanitize_name(k), escape_label_value(v)))
        .collect();
    if let Some(q) = quantile {
        parts.push(format!("quantile=\"{}\"", q));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", parts.join(","))
    }
}

/// Replace characters the exposition format rejects with underscores
fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_metrics::MetricsRegistry;

    #[test]
    fn test_counter_and_gauge_lines() {
        let registry = MetricsRegistry::new(100);
        registry.add_counter("pulse_requests_total", pulse_core::kv!("service" => "api"), 3.0, None);
        registry.set_gauge("pulse_queue_depth", pulse_core::kv!("service" => "api"), 7.5, None);

        let text = render_prometheus(&registry.snapshot());
        assert!(text.contains("# TYPE pulse_requests_total counter"));
        assert!(text.contains("pulse_requests_total{service=\"api\"} 3"));
        assert!(text.contains("# TYPE pulse_queue_depth gauge"));
        assert!(text.contains("pulse_queue_depth{service=\"api\"} 7.5"));
    }

    #[test]
    fn test_histogram_quantiles_count_and_sum() {
        let registry = MetricsRegistry::new(100);
        for ms in [10.0, 20.0, 30.0, 40.0] {
            registry.observe_histogram("pulse_request_duration_ms", pulse_core::kv!(), ms, None);
        }

        let text = render_prometheus(&registry.snapshot());
        assert!(text.contains("# TYPE pulse_request_duration_ms summary"));
        assert!(text.contains("pulse_request_duration_ms{quantile=\"0.5\"} 20"));
        assert!(text.contains("pulse_request_duration_ms_count 4"));
        assert!(text.contains("pulse_request_duration_ms_sum 100"));
    }

    #[test]
    fn test_one_type_line_for_labeled_variants() {
        let registry = MetricsRegistry::new(100);
        registry.add_counter("hits", pulse_core::kv!("service" => "a"), 1.0, None);
        registry.add_counter("hits", pulse_core::kv!("service" => "b"), 1.0, None);

        let text = render_prometheus(&registry.snapshot());
        assert_eq!(text.matches("# TYPE hits counter").count(), 1);
        assert!(text.contains("hits{service=\"a\"} 1"));
        assert!(text.contains("hits{service=\"b\"} 1"));
    }

    #[test]
    fn test_name_sanitization_and_label_escaping() {
        assert_eq!(sanitize_name("http.server/latency"), "http_server_latency");
        assert_eq!(sanitize_name("2xx"), "_2xx");
        assert_eq!(escape_label_value("a\"b\\c"), "a\\\"b\\\\c");
    }
}
