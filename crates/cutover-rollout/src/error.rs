use std::time::Duration;

use thiserror::Error;

use cutover_core::{InstanceId, Interrupted, WorkloadError};
use cutover_proxy::SwitchError;

/// Result type alias for strategy operations.
pub type RolloutResult<T> = Result<T, DeploymentError>;

/// Failures while deploying a service.
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("failed to start new instance of {service}: {source}")]
    Start {
        service: String,
        #[source]
        source: WorkloadError,
    },

    #[error("{service} not ready after {attempts} attempts in {elapsed:?}")]
    HealthCheckTimeout {
        service: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("traffic cutover for {service} failed: {source}")]
    Cutover {
        service: String,
        #[source]
        source: SwitchError,
    },

    #[error("deployment of {service} interrupted: {reason}")]
    Cancelled { service: String, reason: Interrupted },

    #[error("{operation} of {service} failed: {source}")]
    Workload {
        service: String,
        operation: &'static str,
        #[source]
        source: WorkloadError,
    },

    #[error("backend {operation} failed: {source}")]
    Legacy {
        operation: &'static str,
        #[source]
        source: WorkloadError,
    },

    #[error("backend reported {service} failed: {message}")]
    ServiceFailed { service: String, message: String },

    #[error("deployment of {service} aborted, new instance {instance} stopped: {cause}")]
    Aborted {
        service: String,
        instance: InstanceId,
        #[source]
        cause: Box<DeploymentError>,
    },
}

impl DeploymentError {
    /// The error that triggered an abort, or `self`.
    pub fn root_cause(&self) -> &DeploymentError {
        match self {
            Self::Aborted { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    pub fn is_health_check_timeout(&self) -> bool {
        matches!(self.root_cause(), Self::HealthCheckTimeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Self::Cancelled { .. })
    }
}
