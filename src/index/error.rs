//! Error types for the local index.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during index operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Failed to open or create the database file.
    #[error("Failed to open index at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// The file exists but is not a usable index.
    #[error("Index at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Failed to run a database migration.
    #[error("Index migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// A query failed.
    #[error("Index query failed: {0}")]
    Query(String),

    /// Another process holds the index lock.
    #[error("Another mitene-sync instance is using {0}")]
    Locked(PathBuf),

    #[error("Index I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// The database schema version is newer than supported.
    #[error("Index schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl IndexError {
    /// Create a Query error from a rusqlite error.
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Whether a SQLite error means the file itself is damaged or not a database.
pub(crate) fn is_corruption_code(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase)
    )
}
