//! Error types for the fan control daemon

use std::time::Duration;
use thiserror::Error;

/// Result type alias for the fan control daemon
pub type Result<T> = std::result::Result<T, FanControlError>;

/// Main error type for the fan control daemon
#[derive(Error, Debug)]
pub enum FanControlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Unrecognized CPU sensor label: {label}")]
    SensorParse { label: String },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl FanControlError {
    /// Short name of the component that raised the error, used in cycle logs
    pub fn stage(&self) -> &'static str {
        match self {
            Self::SensorUnavailable(_) | Self::SensorParse { .. } => "sensor",
            Self::Session(_) => "session",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

/// Failures of the interactive management shell session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to spawn session process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream closed before prompt {prompt:?} was seen")]
    Closed { prompt: String },

    #[error("timed out after {waited:?} waiting for {waiting_for}")]
    Timeout {
        waited: Duration,
        waiting_for: &'static str,
    },
}
