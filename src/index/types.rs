//! Records stored in the local index.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::album::MediaKind;

/// What the index knows about one synchronized media item.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub identifier: String,
    /// Lowercase hex SHA-256 of the file at `local_path`.
    pub checksum: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub synced_at: DateTime<Utc>,
    pub kind: MediaKind,
}

/// A media item whose last download attempt failed.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub identifier: String,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

/// Statistics for a single sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncRunStats {
    pub items_seen: u64,
    pub items_downloaded: u64,
    pub items_skipped: u64,
    pub items_failed: u64,
    /// Whether the run was cancelled before it finished.
    pub interrupted: bool,
}

/// Summary of one album's slice of the index.
#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub entries: u64,
    pub photos: u64,
    pub videos: u64,
    pub total_bytes: u64,
    pub failed: u64,
    pub last_sync_started: Option<DateTime<Utc>>,
    pub last_sync_completed: Option<DateTime<Utc>>,
    pub last_sync_interrupted: bool,
}
