//! JSONL alert sink
//!
//! Appends one JSON document per alert to a file. The default target
//! suits ad-hoc debugging; production deployments point it at a path a
//! log shipper watches.

use crate::{AlertSink, ExportResult};
use async_trait::async_trait;
use pulse_core::record::AnomalyAlert;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone)]
pub struct JsonlSinkConfig {
    /// Output file path
    pub path: PathBuf,

    /// Append to an existing file instead of truncating
    pub append: bool,

    /// Flush after each alert
    pub flush_each: bool,
}

impl Default for JsonlSinkConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/pulse-alerts.jsonl"),
            append: true,
            flush_each: true,
        }
    }
}

/// Alert sink that writes one JSON line per alert
pub struct JsonlAlertSink {
    config: JsonlSinkConfig,
    writer: Mutex<BufWriter<File>>,
    alerts_written: AtomicU64,
}

impl JsonlAlertSink {
    pub fn new(config: JsonlSinkConfig) -> ExportResult<Self> {
        let file = if config.append {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.path)?
        } else {
            File::create(&config.path)?
        };
        info!("JSONL alert sink writing to: {:?}", config.path);
        Ok(Self {
            config,
            writer: Mutex::new(BufWriter::new(file)),
            alerts_written: AtomicU64::new(0),
        })
    }

    pub fn alerts_written(&self) -> u64 {
        self.alerts_written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AlertSink for JsonlAlertSink {
    fn name(&self) -> &str {
        "jsonl-alert-sink"
    }

    async fn deliver(&self, alert: &AnomalyAlert) -> ExportResult<()> {
        let line = serde_json::to_string(alert)?;
        {
            let mut writer = self
                .writer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            writeln!(writer, "{}", line)?;
            if self.config.flush_each {
                writer.flush()?;
            }
        }
        self.alerts_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_core::record::Severity;

    fn alert() -> AnomalyAlert {
        AnomalyAlert {
            metric_key: "pulse_request_duration_ms{service=api}".into(),
            baseline: 100.0,
            observed: 500.0,
            deviation_ratio: 5.0,
            severity: Severity::High,
            recommended_action: "scale up / investigate".into(),
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_sink_appends_one_line_per_alert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let sink = JsonlAlertSink::new(JsonlSinkConfig {
            path: path.clone(),
            append: true,
            flush_each: true,
        })
        .unwrap();

        sink.deliver(&alert()).await.unwrap();
        sink.deliver(&alert()).await.unwrap();
        assert_eq!(sink.alerts_written(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AnomalyAlert = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.severity, Severity::High);
    }
}
