//! cutover-ledger — durable deployment history.
//!
//! Every deploy and rollback writes a `started` entry followed by exactly
//! one terminal (`success` or `failed`) entry. The ledger keeps the most
//! recent [`DEFAULT_CAPACITY`] entries across all environments and evicts
//! the oldest first.
//!
//! # Storage
//!
//! Entries are kept as a pretty-printed JSON array, oldest first, so the
//! file can be read with any text tool. Each write reads the whole file,
//! appends, trims, and replaces the file through a temp file and rename.
//! An in-memory mode backs the tests.

pub mod error;
pub mod store;
pub mod types;

pub use error::{LedgerError, LedgerResult};
pub use store::{Ledger, DEFAULT_CAPACITY};
pub use types::*;
