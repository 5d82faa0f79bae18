//! Local index: which media items are already on disk, and with what content.
//!
//! Backed by a SQLite database in the state directory. Besides the entries it
//! keeps a failure log, the history of sync runs and the saved album list.

pub mod db;
pub mod error;
mod lock;
pub mod schema;
pub mod types;

pub use db::{sidecar_paths, LocalIndex, SqliteIndex};
pub use error::IndexError;
pub use lock::IndexLock;
pub use types::{IndexEntry, SyncRunStats};

/// File name of the index database inside the state directory.
pub const INDEX_FILE: &str = "index.db";
