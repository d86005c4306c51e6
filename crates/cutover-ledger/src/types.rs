//! Ledger record types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Strategy name recorded for every rollback.
pub const ROLLBACK_STRATEGY: &str = "rollback";

/// Lifecycle marker of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Started,
    Success,
    Failed,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One recorded step of a deploy or rollback invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    /// UTC, serialized as ISO-8601.
    pub timestamp: DateTime<Utc>,
    pub environment: String,
    /// Image or version identifier.
    pub image: String,
    pub status: EntryStatus,
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LedgerEntry {
    fn new(environment: &str, image: &str, strategy: &str, status: EntryStatus, error: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            environment: environment.to_string(),
            image: image.to_string(),
            status,
            strategy: strategy.to_string(),
            error,
        }
    }

    pub fn started(environment: &str, image: &str, strategy: &str) -> Self {
        Self::new(environment, image, strategy, EntryStatus::Started, None)
    }

    pub fn success(environment: &str, image: &str, strategy: &str) -> Self {
        Self::new(environment, image, strategy, EntryStatus::Success, None)
    }

    pub fn failed(environment: &str, image: &str, strategy: &str, error: &str) -> Self {
        Self::new(environment, image, strategy, EntryStatus::Failed, Some(error.to_string()))
    }
}

/// Aggregate counts over ledger entries.
///
/// `total` counts finished invocations (`successful + failed`); entries
/// still marked `started` are reported separately.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Statistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub started: usize,
    /// Percentage, rounded to two decimals.
    pub success_rate: f64,
}

impl Statistics {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut stats = Self::default();
        for entry in entries {
            match entry.status {
                EntryStatus::Started => stats.started += 1,
                EntryStatus::Success => stats.successful += 1,
                EntryStatus::Failed => stats.failed += 1,
            }
        }
        stats.total = stats.successful + stats.failed;
        if stats.total > 0 {
            let rate = stats.successful as f64 / stats.total as f64 * 100.0;
            stats.success_rate = (rate * 100.0).round() / 100.0;
        }
        stats
    }
}
