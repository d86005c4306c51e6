//! Ledger — bounded, append-only deployment history.
//!
//! The file is the only state: every query reads it in full, every write
//! is a locked read-modify-write. With at most [`DEFAULT_CAPACITY`]
//! entries there is nothing to index.
//!
//! The API is synchronous and blocks on file I/O while holding the lock.
//! Async callers run it on the blocking pool (`tokio::task::spawn_blocking`).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};
use crate::types::*;

/// Entries kept across all environments.
pub const DEFAULT_CAPACITY: usize = 100;

/// Convert any `Display` error into a `LedgerError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| LedgerError::$variant(e.to_string())
    };
}

enum Storage {
    File(PathBuf),
    Memory(Vec<LedgerEntry>),
}

/// Thread-safe handle to the deployment ledger.
#[derive(Clone)]
pub struct Ledger {
    /// Serializes read-modify-write cycles.
    storage: Arc<Mutex<Storage>>,
    capacity: usize,
}

impl Ledger {
    /// Open the ledger stored at `path`. The file is created on first write.
    pub fn open(path: &Path) -> Self {
        debug!(?path, "ledger opened");
        Self {
            storage: Arc::new(Mutex::new(Storage::File(path.to_path_buf()))),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Create an ephemeral in-memory ledger (for testing).
    pub fn in_memory() -> Self {
        Self {
            storage: Arc::new(Mutex::new(Storage::Memory(Vec::new()))),
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Append `entry`, evicting the oldest entries beyond capacity.
    pub fn record(&self, entry: LedgerEntry) -> LedgerResult<()> {
        let mut storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = load(&storage)?;
        info!(
            environment = %entry.environment,
            image = %entry.image,
            status = %entry.status,
            strategy = %entry.strategy,
            "ledger entry recorded"
        );
        entries.push(entry);

        if entries.len() > self.capacity {
            let evicted = entries.len() - self.capacity;
            entries.drain(..evicted);
            debug!(evicted, "evicted oldest ledger entries");
        }
        save(&mut storage, entries)
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        let storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
        load(&storage)
    }

    /// Entries newest first, optionally for one environment, at most `limit`.
    pub fn history(&self, environment: Option<&str>, limit: Option<usize>) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .rev()
            .filter(|e| environment.is_none_or(|env| e.environment == env))
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    /// Most recent successful entry for `environment`.
    pub fn last_successful(&self, environment: &str) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .rev()
            .find(|e| e.environment == environment && e.status == EntryStatus::Success))
    }

    /// Distinct successfully deployed images for `environment`, most
    /// recent first. These are the rollback candidates.
    pub fn available_versions(&self, environment: &str) -> LedgerResult<Vec<String>> {
        let mut versions: Vec<String> = Vec::new();
        for entry in self.entries()?.into_iter().rev() {
            if entry.environment == environment
                && entry.status == EntryStatus::Success
                && !versions.contains(&entry.image)
            {
                versions.push(entry.image);
            }
        }
        Ok(versions)
    }

    /// Counts and success rate, optionally for one environment.
    pub fn statistics(&self, environment: Option<&str>) -> LedgerResult<Statistics> {
        let entries = self.entries()?;
        Ok(Statistics::from_entries(
            entries
                .iter()
                .filter(|e| environment.is_none_or(|env| e.environment == env)),
        ))
    }
}

fn load(storage: &Storage) -> LedgerResult<Vec<LedgerEntry>> {
    match storage {
        Storage::Memory(entries) => Ok(entries.clone()),
        Storage::File(path) => {
            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(LedgerError::Read(format!("{}: {e}", path.display()))),
            };
            if content.trim().is_empty() {
                return Ok(Vec::new());
            }
            serde_json::from_str(&content).map_err(map_err!(Deserialize))
        }
    }
}

fn save(storage: &mut Storage, entries: Vec<LedgerEntry>) -> LedgerResult<()> {
    match storage {
        Storage::Memory(stored) => {
            *stored = entries;
            Ok(())
        }
        Storage::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(map_err!(Write))?;
            }
            let json = serde_json::to_vec_pretty(&entries).map_err(map_err!(Serialize))?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json).map_err(map_err!(Write))?;
            std::fs::rename(&tmp, &*path).map_err(map_err!(Write))?;
            Ok(())
        }
    }
}
