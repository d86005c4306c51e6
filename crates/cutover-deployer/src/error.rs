//! Orchestrator error types.

use thiserror::Error;

use cutover_core::{ConfigError, WorkloadError};
use cutover_ledger::LedgerError;
use cutover_proxy::SwitchError;
use cutover_rollout::DeploymentError;

/// Errors surfaced by deploy, rollback, and status.
#[derive(Debug, Error)]
pub enum DeployerError {
    /// Raised before any ledger entry is written.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("deployment failed: {0}")]
    Deployment(#[from] DeploymentError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("workload backend error: {0}")]
    Workload(#[from] WorkloadError),

    #[error("traffic switch error: {0}")]
    Switch(#[from] SwitchError),
}

impl DeployerError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// The strategy error, if the run itself failed.
    pub fn deployment(&self) -> Option<&DeploymentError> {
        match self {
            Self::Deployment(e) => Some(e),
            _ => None,
        }
    }
}

pub type DeployerResult<T> = Result<T, DeployerError>;
