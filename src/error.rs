//! Error types for the coordination core.

use std::time::Duration;

/// Top-level error type for the coordination core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Run context error: {0}")]
    Context(#[from] ContextError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Message bus errors, raised by request/response correlation.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Analysis request {request_id} timed out after {timeout:?}")]
    Timeout {
        request_id: String,
        timeout: Duration,
    },

    #[error("Analysis request {request_id} was answered with a failure: {response}")]
    Rejected {
        request_id: String,
        response: serde_json::Value,
    },

    #[error("Analysis request {request_id} abandoned: run {run_id} was closed")]
    RunClosed { request_id: String, run_id: String },

    #[error("Response channel for request {request_id} closed")]
    ChannelClosed { request_id: String },
}

impl BusError {
    /// Whether this error is the timeout class.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Run context errors. These are caller-side programming errors.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("No agent is active in run {run_id}; call set_current_agent first")]
    NoActiveAgent { run_id: String },

    #[error("Unknown agent type: {0}")]
    UnknownAgent(String),
}

/// Result type alias for the coordination core.
pub type Result<T> = std::result::Result<T, Error>;
