//! Index schema definitions and migrations.

use rusqlite::Connection;

use super::error::IndexError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Schema DDL for version 1.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS media (
    album TEXT NOT NULL,
    id TEXT NOT NULL,
    kind TEXT NOT NULL,
    checksum TEXT NOT NULL,
    local_path TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    synced_at INTEGER NOT NULL,
    PRIMARY KEY (album, id)
);

CREATE INDEX IF NOT EXISTS idx_media_checksum ON media(checksum);

CREATE TABLE IF NOT EXISTS failures (
    album TEXT NOT NULL,
    id TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT NOT NULL,
    failed_at INTEGER NOT NULL,
    PRIMARY KEY (album, id)
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    album TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    items_seen INTEGER DEFAULT 0,
    items_downloaded INTEGER DEFAULT 0,
    items_skipped INTEGER DEFAULT 0,
    items_failed INTEGER DEFAULT 0,
    interrupted INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS saved_albums (
    url TEXT PRIMARY KEY,
    added_at INTEGER NOT NULL
);
"#;

/// Columns every query relies on; used to tell a foreign database apart
/// from ours.
pub(crate) const SHAPE_CHECK: &str =
    "SELECT album, id, kind, checksum, local_path, size_bytes, synced_at FROM media LIMIT 0";

/// Get the current schema version from the database.
pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, IndexError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), IndexError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initialize or migrate the database schema.
///
/// Idempotent on both new and existing databases.
pub(crate) fn migrate(conn: &Connection) -> Result<(), IndexError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(IndexError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    if current_version < SCHEMA_VERSION {
        conn.execute_batch(SCHEMA_V1)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::debug!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Initialized index schema"
        );
    }

    Ok(())
}
