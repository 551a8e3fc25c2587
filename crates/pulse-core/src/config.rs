//! Configuration system for the Pulse engine
//!
//! Provides:
//! - Config file discovery (explicit path, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation of ranges and capacities

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine-wide settings
    pub engine: EngineSettings,

    /// Sampling strategy
    pub sampling: SamplingSettings,

    /// Buffer capacities and staleness bounds
    pub limits: LimitSettings,

    /// Metrics engine settings
    pub metrics: MetricsSettings,

    /// Anomaly detector settings
    pub anomaly: AnomalySettings,
}

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Default service name tagged on spans opened by the inbound hooks
    pub service_name: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            service_name: "unknown".to_string(),
        }
    }
}

/// Which sampling strategy retains trace detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SamplingSettings {
    /// Probabilistic decision at root start; propagates to descendants
    Head { probability: f64 },

    /// Decision at trace completion: keep errors, slow traces, and
    /// head-sampled traces; everything else becomes aggregate-only
    Tail { slow_threshold_ms: u64 },

    /// Head sampling with a probability adjusted periodically toward a
    /// target retained-trace rate
    Adaptive {
        target_rate: f64,
        p_min: f64,
        p_max: f64,
        interval_secs: u64,
    },
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self::Head { probability: 0.1 }
    }
}

/// Buffer capacities and staleness bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    /// Maximum concurrently open spans; further requests run untraced
    pub max_active_spans: usize,

    /// Finalized-trace ring capacity
    pub trace_capacity: usize,

    /// Metric sample ring capacity
    pub metric_capacity: usize,

    /// Log entry ring capacity
    pub log_capacity: usize,

    /// Per-trace cap on correlated log/metric ids in the side index
    pub side_index_per_trace: usize,

    /// Spans open longer than this are force-closed as abandoned
    pub stale_after_secs: u64,

    /// How often the staleness sweep runs
    pub sweep_interval_secs: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_active_spans: 10_000,
            trace_capacity: 10_000,
            metric_capacity: 100_000,
            log_capacity: 50_000,
            side_index_per_trace: 256,
            stale_after_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

/// Metrics engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Rolling window size per histogram label set
    pub histogram_window: usize,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            histogram_window: 1000,
        }
    }
}

/// Anomaly detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalySettings {
    /// EMA smoothing factor
    pub alpha: f64,

    /// Latency alert when observed exceeds baseline by this factor
    pub latency_factor: f64,

    /// Error-rate alert when observed exceeds baseline by this factor
    pub error_rate_factor: f64,

    /// Alert ring capacity
    pub alert_capacity: usize,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            latency_factor: 3.0,
            error_rate_factor: 2.0,
            alert_capacity: 1000,
        }
    }
}

/// Loads configuration with discovery and env overrides
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Explicit config path (takes precedence over discovery)
    explicit_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            explicit_path: None,
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            explicit_path: Some(path.into()),
        }
    }

    /// Load configuration, in order of precedence:
    /// 1. Explicit path
    /// 2. PULSE_CONFIG environment variable
    /// 3. ~/.config/pulse/config.toml
    /// 4. /etc/pulse/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<EngineConfig> {
        let config_path = self.find_config_file();

        let mut config = if let Some(path) = config_path {
            info!("Loading configuration from: {}", path.display());
            self.load_from_file(&path)?
        } else {
            debug!("No config file found, using defaults");
            EngineConfig::default()
        };

        self.apply_env_overrides(&mut config);
        validate(&config)?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.explicit_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("Config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("PULSE_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("PULSE_CONFIG path does not exist: {}", env_path);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("pulse").join("config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/pulse/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn load_from_file(&self, path: &Path) -> ConfigResult<EngineConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    fn apply_env_overrides(&self, config: &mut EngineConfig) {
        if let Ok(val) = std::env::var("PULSE_LOG_LEVEL") {
            config.engine.log_level = val;
        }
        if let Ok(val) = std::env::var("PULSE_SERVICE_NAME") {
            config.engine.service_name = val;
        }
        if let Ok(val) = std::env::var("PULSE_HEAD_PROBABILITY") {
            if let Ok(p) = val.parse() {
                config.sampling = SamplingSettings::Head { probability: p };
            }
        }
        if let Ok(val) = std::env::var("PULSE_MAX_ACTIVE_SPANS") {
            if let Ok(n) = val.parse() {
                config.limits.max_active_spans = n;
            }
        }
        if let Ok(val) = std::env::var("PULSE_TRACE_CAPACITY") {
            if let Ok(n) = val.parse() {
                config.limits.trace_capacity = n;
            }
        }
        if let Ok(val) = std::env::var("PULSE_STALE_AFTER_SECS") {
            if let Ok(n) = val.parse() {
                config.limits.stale_after_secs = n;
            }
        }
        if let Ok(val) = std::env::var("PULSE_HISTOGRAM_WINDOW") {
            if let Ok(n) = val.parse() {
                config.metrics.histogram_window = n;
            }
        }
    }
}

/// Range and capacity checks
pub fn validate(config: &EngineConfig) -> ConfigResult<()> {
    match &config.sampling {
        SamplingSettings::Head { probability } => {
            if !(0.0..=1.0).contains(probability) {
                return Err(ConfigError::ValidationError(format!(
                    "head probability must be within [0, 1], got {}",
                    probability
                )));
            }
        }
        SamplingSettings::Tail { slow_threshold_ms } => {
            if *slow_threshold_ms == 0 {
                return Err(ConfigError::ValidationError(
                    "tail slow_threshold_ms must be positive".into(),
                ));
            }
        }
        SamplingSettings::Adaptive {
            target_rate,
            p_min,
            p_max,
            interval_secs,
        } => {
            if !(0.0..=1.0).contains(target_rate) || *target_rate == 0.0 {
                return Err(ConfigError::ValidationError(
                    "adaptive target_rate must be within (0, 1]".into(),
                ));
            }
            if !(0.0..=1.0).contains(p_min) || !(0.0..=1.0).contains(p_max) || p_min > p_max {
                return Err(ConfigError::ValidationError(
                    "adaptive bounds must satisfy 0 <= p_min <= p_max <= 1".into(),
                ));
            }
            if *interval_secs == 0 {
                return Err(ConfigError::ValidationError(
                    "adaptive interval_secs must be positive".into(),
                ));
            }
        }
    }

    if config.anomaly.alpha <= 0.0 || config.anomaly.alpha >= 1.0 {
        return Err(ConfigError::ValidationError(format!(
            "anomaly alpha must be within (0, 1), got {}",
            config.anomaly.alpha
        )));
    }

    for (name, value) in [
        ("trace_capacity", config.limits.trace_capacity),
        ("metric_capacity", config.limits.metric_capacity),
        ("log_capacity", config.limits.log_capacity),
        ("side_index_per_trace", config.limits.side_index_per_trace),
        ("histogram_window", config.metrics.histogram_window),
    ] {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{} must be positive",
                name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.limits.trace_capacity, 10_000);
        assert_eq!(config.limits.stale_after_secs, 300);
        assert_eq!(config.metrics.histogram_window, 1000);
        assert_eq!(config.sampling, SamplingSettings::Head { probability: 0.1 });
    }

    #[test]
    fn test_parse_toml_sampling_strategies() {
        let config: EngineConfig = toml::from_str(
            r#"
            [sampling]
            strategy = "tail"
            slow_threshold_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(
            config.sampling,
            SamplingSettings::Tail {
                slow_threshold_ms: 500
            }
        );

        let config: EngineConfig = toml::from_str(
            r#"
            [sampling]
            strategy = "adaptive"
            target_rate = 0.01
            p_min = 0.001
            p_max = 0.5
            interval_secs = 60
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.sampling,
            SamplingSettings::Adaptive { .. }
        ));
    }

    #[test]
    fn test_validation_rejects_bad_probability() {
        let mut config = EngineConfig::default();
        config.sampling = SamplingSettings::Head { probability: 1.5 };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_alpha() {
        let mut config = EngineConfig::default();
        config.anomaly.alpha = 1.0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let mut config = EngineConfig::default();
        config.limits.trace_capacity = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [engine]
            service_name = "checkout"

            [limits]
            max_active_spans = 42
            "#
        )
        .unwrap();

        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        assert_eq!(config.engine.service_name, "checkout");
        assert_eq!(config.limits.max_active_spans, 42);
        // untouched sections fall back to defaults
        assert_eq!(config.limits.trace_capacity, 10_000);
    }
}
