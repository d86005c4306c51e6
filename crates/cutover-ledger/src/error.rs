//! Error types for the deployment ledger.

use thiserror::Error;

/// Result type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur while reading or writing the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read ledger: {0}")]
    Read(String),

    #[error("failed to write ledger: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("ledger file is corrupt: {0}")]
    Deserialize(String),
}
