//! Error types for configuration loading and workload backends.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for Workload Port operations.
pub type WorkloadResult<T> = Result<T, WorkloadError>;

/// Bad or missing configuration. Always surfaced before any state change.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("environment not configured: {0}")]
    UnknownEnvironment(String),

    #[error("unknown provider '{provider}' for environment {environment}")]
    UnknownProvider {
        environment: String,
        provider: String,
    },

    #[error("unknown proxy type '{kind}' for environment {environment}")]
    UnknownProxy { environment: String, kind: String },

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid port mapping: {0}")]
    InvalidPort(String),

    #[error("environment {environment}: {message}")]
    Invalid {
        environment: String,
        message: String,
    },
}

/// Errors reported by a Workload Port implementation.
#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("instance {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: crate::types::InstanceStatus,
        to: crate::types::InstanceStatus,
    },

    #[error("operation not supported by {backend}: {operation}")]
    Unsupported { backend: String, operation: String },

    #[error("backend error: {0}")]
    Backend(String),
}
