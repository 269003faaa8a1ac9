//! Error types
//!
//! Failures that can surface from configuration loading and stats persistence.
//! Handler failures are plain `anyhow::Error` and never leave the dispatcher.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Policy file parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid policy for {command}: {reason}")]
    InvalidPolicy { command: String, reason: String },
}

pub type Result<T> = std::result::Result<T, GateError>;
