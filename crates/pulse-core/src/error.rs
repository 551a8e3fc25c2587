//! Engine error taxonomy
//!
//! Recoverable input problems (malformed headers, bad labels) are modeled
//! as `Option` returns at the parsing layer and never reach this type.
//! These variants cover engine lifecycle and export failures only; the
//! instrumentation hot path never returns an error to the caller.

use crate::config::ConfigError;
use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine already running")]
    AlreadyRunning,

    #[error("Engine not running")]
    NotRunning,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
