//! Local index trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::{is_corruption_code, IndexError};
use super::schema;
use super::types::{FailureRecord, IndexEntry, IndexSummary, SyncRunStats};
use crate::album::MediaKind;
use crate::download::checksum::sha256_file;

/// Per-album view of the local index.
///
/// Object-safe so the synchronizer can hold an `Arc<dyn LocalIndex>`. Only
/// the synchronizer mutates it; download workers just return results.
#[async_trait]
pub trait LocalIndex: Send + Sync {
    async fn lookup(&self, identifier: &str) -> Result<Option<IndexEntry>, IndexError>;

    /// Insert or replace the entry for `entry.identifier` and clear any
    /// recorded failure for it. Last write wins.
    async fn record(&self, entry: &IndexEntry) -> Result<(), IndexError>;

    /// Whether the item can be skipped.
    ///
    /// With a remote checksum the stored checksum must match it; without one
    /// presence is enough. Either way the recorded file must still exist with
    /// the recorded size, and with `verify_content` its SHA-256 is recomputed.
    /// An entry that fails these checks is treated as absent.
    async fn is_up_to_date(
        &self,
        identifier: &str,
        remote_checksum: Option<&str>,
        verify_content: bool,
    ) -> Result<bool, IndexError>;

    async fn record_failure(&self, identifier: &str, error: &str) -> Result<(), IndexError>;

    async fn failures(&self) -> Result<Vec<FailureRecord>, IndexError>;

    async fn entries(&self) -> Result<Vec<IndexEntry>, IndexError>;

    async fn summary(&self) -> Result<IndexSummary, IndexError>;

    /// Start a new sync run and return its ID.
    async fn start_sync_run(&self) -> Result<i64, IndexError>;

    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats)
        -> Result<(), IndexError>;

    /// Checkpoint the write-ahead log into the main database file.
    async fn flush(&self) -> Result<(), IndexError>;
}

/// SQLite database holding the index of every album plus the saved album list.
pub struct SqliteIndex {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteIndex")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, IndexError> {
    conn.lock().map_err(|e| IndexError::Query(e.to_string()))
}

fn corrupt(path: &Path, reason: impl std::fmt::Display) -> IndexError {
    IndexError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn timestamp(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

/// `<path><suffix>`, e.g. `index.db-wal`.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// The `-wal` and `-shm` files SQLite keeps next to a database in WAL mode.
pub fn sidecar_paths(path: &Path) -> [PathBuf; 2] {
    [with_suffix(path, "-wal"), with_suffix(path, "-shm")]
}

impl SqliteIndex {
    /// Open or create an index at the given path.
    ///
    /// A file that is not a SQLite database, fails the integrity check or
    /// lacks the expected tables is reported as [`IndexError::Corrupt`].
    pub async fn open(path: &Path) -> Result<Self, IndexError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let path = path_clone;
            let conn = Connection::open(&path).map_err(|e| IndexError::Open {
                path: path.clone(),
                source: e,
            })?;
            let classify = |e: rusqlite::Error| {
                if is_corruption_code(&e) {
                    corrupt(&path, e)
                } else {
                    IndexError::Migration(e)
                }
            };

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(classify)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(classify)?;

            let check: String = conn
                .pragma_query_value(None, "quick_check", |row| row.get(0))
                .map_err(classify)?;
            if check != "ok" {
                return Err(corrupt(&path, check));
            }

            // An existing file whose tables cannot be migrated is not ours.
            schema::migrate(&conn).map_err(|e| match e {
                IndexError::Migration(inner) => {
                    corrupt(&path, format!("migration failed: {inner}"))
                }
                other => other,
            })?;
            conn.prepare(schema::SHAPE_CHECK)
                .map_err(|e| corrupt(&path, format!("unexpected schema: {e}")))?;

            Ok::<_, IndexError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Open the index, moving a corrupt one aside and starting empty.
    ///
    /// The damaged file and its sidecars are renamed to
    /// `<name>.corrupt-<unix-ts>`; nothing is deleted.
    pub async fn open_or_recover(path: &Path) -> Result<Self, IndexError> {
        match Self::open(path).await {
            Err(e) if e.is_corruption() => {
                let quarantined = quarantine(path).await?;
                tracing::warn!(
                    path = %path.display(),
                    moved_to = %quarantined.display(),
                    error = %e,
                    "LocalIndexCorruption: starting with an empty index, items will be re-downloaded"
                );
                Self::open(path).await
            }
            other => other,
        }
    }

    /// Open an in-memory index (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory().map_err(|e| IndexError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// View of the entries belonging to one album.
    pub fn album(&self, album_key: &str) -> AlbumIndex {
        AlbumIndex {
            conn: Arc::clone(&self.conn),
            album: album_key.to_string(),
        }
    }

    /// Remember an album URL. Returns false if it was already saved.
    pub async fn add_saved_album(&self, url: &str) -> Result<bool, IndexError> {
        let conn = lock(&self.conn)?;
        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO saved_albums (url, added_at) VALUES (?1, ?2)",
                rusqlite::params![url, Utc::now().timestamp()],
            )
            .map_err(IndexError::query)?;
        Ok(rows > 0)
    }

    /// Forget an album URL. Returns false if it was not saved.
    pub async fn remove_saved_album(&self, url: &str) -> Result<bool, IndexError> {
        let conn = lock(&self.conn)?;
        let rows = conn
            .execute("DELETE FROM saved_albums WHERE url = ?1", [url])
            .map_err(IndexError::query)?;
        Ok(rows > 0)
    }

    pub async fn saved_albums(&self) -> Result<Vec<String>, IndexError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare("SELECT url FROM saved_albums ORDER BY added_at, url")
            .map_err(IndexError::query)?;
        let urls = stmt
            .query_map([], |row| row.get(0))
            .map_err(IndexError::query)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(IndexError::query)?;
        Ok(urls)
    }

    /// Every album that has entries, failures, runs, or is saved.
    pub async fn known_albums(&self) -> Result<Vec<String>, IndexError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare(
                "SELECT album FROM media UNION SELECT album FROM failures \
                 UNION SELECT album FROM sync_runs UNION SELECT url FROM saved_albums \
                 ORDER BY 1",
            )
            .map_err(IndexError::query)?;
        let albums = stmt
            .query_map([], |row| row.get(0))
            .map_err(IndexError::query)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(IndexError::query)?;
        Ok(albums)
    }
}

/// Rename a damaged database and its sidecars out of the way.
async fn quarantine(path: &Path) -> Result<PathBuf, IndexError> {
    let suffix = format!(".corrupt-{}", Utc::now().timestamp());
    let target = with_suffix(path, &suffix);
    tokio::fs::rename(path, &target).await?;
    for sidecar in sidecar_paths(path) {
        if tokio::fs::try_exists(&sidecar).await.unwrap_or(false) {
            tokio::fs::rename(&sidecar, with_suffix(&sidecar, &suffix)).await?;
        }
    }
    Ok(target)
}

/// [`LocalIndex`] scoped to one album key. Cheap to create; shares the
/// connection with the [`SqliteIndex`] it came from.
#[derive(Clone)]
pub struct AlbumIndex {
    conn: Arc<Mutex<Connection>>,
    album: String,
}

const ENTRY_COLUMNS: &str = "id, checksum, local_path, size_bytes, synced_at, kind";

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexEntry> {
    let local_path: String = row.get(2)?;
    let size_bytes: i64 = row.get(3)?;
    let synced_at: i64 = row.get(4)?;
    let kind: String = row.get(5)?;
    Ok(IndexEntry {
        identifier: row.get(0)?,
        checksum: row.get(1)?,
        local_path: PathBuf::from(local_path),
        size_bytes: size_bytes.max(0) as u64,
        synced_at: timestamp(synced_at).unwrap_or(DateTime::UNIX_EPOCH),
        kind: MediaKind::from_str(&kind).unwrap_or(MediaKind::Photo),
    })
}

#[async_trait]
impl LocalIndex for AlbumIndex {
    async fn lookup(&self, identifier: &str) -> Result<Option<IndexEntry>, IndexError> {
        let conn = lock(&self.conn)?;
        conn.query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM media WHERE album = ?1 AND id = ?2"),
            [&self.album, identifier],
            row_to_entry,
        )
        .optional()
        .map_err(IndexError::query)
    }

    async fn record(&self, entry: &IndexEntry) -> Result<(), IndexError> {
        let conn = lock(&self.conn)?;

        conn.execute("BEGIN TRANSACTION", [])
            .map_err(IndexError::query)?;

        let result = (|| {
            conn.execute(
                r#"
                INSERT INTO media (album, id, kind, checksum, local_path, size_bytes, synced_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(album, id) DO UPDATE SET
                    kind = excluded.kind,
                    checksum = excluded.checksum,
                    local_path = excluded.local_path,
                    size_bytes = excluded.size_bytes,
                    synced_at = excluded.synced_at
                "#,
                rusqlite::params![
                    &self.album,
                    &entry.identifier,
                    entry.kind.as_str(),
                    &entry.checksum,
                    entry.local_path.to_string_lossy(),
                    entry.size_bytes as i64,
                    entry.synced_at.timestamp(),
                ],
            )
            .map_err(IndexError::query)?;
            conn.execute(
                "DELETE FROM failures WHERE album = ?1 AND id = ?2",
                [&self.album, &entry.identifier],
            )
            .map_err(IndexError::query)?;
            Ok::<_, IndexError>(())
        })();

        match result {
            Ok(()) => {
                conn.execute("COMMIT", []).map_err(IndexError::query)?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    async fn is_up_to_date(
        &self,
        identifier: &str,
        remote_checksum: Option<&str>,
        verify_content: bool,
    ) -> Result<bool, IndexError> {
        let Some(entry) = self.lookup(identifier).await? else {
            return Ok(false);
        };

        if let Some(remote) = remote_checksum {
            if !remote.eq_ignore_ascii_case(&entry.checksum) {
                tracing::debug!(id = %identifier, "Remote checksum changed, will re-download");
                return Ok(false);
            }
        }

        let size = match tokio::fs::metadata(&entry.local_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) | Err(_) => {
                tracing::debug!(
                    id = %identifier,
                    path = %entry.local_path.display(),
                    "Indexed file missing, will re-download"
                );
                return Ok(false);
            }
        };
        if size != entry.size_bytes {
            tracing::warn!(
                id = %identifier,
                path = %entry.local_path.display(),
                expected = entry.size_bytes,
                actual = size,
                "Indexed file has the wrong size, will re-download"
            );
            return Ok(false);
        }

        if verify_content {
            match sha256_file(&entry.local_path).await {
                Ok(actual) if actual == entry.checksum => {}
                Ok(_) => {
                    tracing::warn!(
                        id = %identifier,
                        path = %entry.local_path.display(),
                        "Indexed file content does not match its checksum, will re-download"
                    );
                    return Ok(false);
                }
                Err(e) => {
                    tracing::warn!(
                        id = %identifier,
                        path = %entry.local_path.display(),
                        error = %e,
                        "Failed to hash indexed file, will re-download"
                    );
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    async fn record_failure(&self, identifier: &str, error: &str) -> Result<(), IndexError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            r#"
            INSERT INTO failures (album, id, attempts, last_error, failed_at)
            VALUES (?1, ?2, 1, ?3, ?4)
            ON CONFLICT(album, id) DO UPDATE SET
                attempts = attempts + 1,
                last_error = excluded.last_error,
                failed_at = excluded.failed_at
            "#,
            rusqlite::params![&self.album, identifier, error, Utc::now().timestamp()],
        )
        .map_err(IndexError::query)?;
        Ok(())
    }

    async fn failures(&self) -> Result<Vec<FailureRecord>, IndexError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, attempts, last_error, failed_at FROM failures WHERE album = ?1 ORDER BY id",
            )
            .map_err(IndexError::query)?;
        let records = stmt
            .query_map([&self.album], |row| {
                let attempts: i64 = row.get(1)?;
                let failed_at: i64 = row.get(3)?;
                Ok(FailureRecord {
                    identifier: row.get(0)?,
                    attempts: attempts.max(0) as u32,
                    last_error: row.get(2)?,
                    failed_at: timestamp(failed_at).unwrap_or(DateTime::UNIX_EPOCH),
                })
            })
            .map_err(IndexError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(IndexError::query)?;
        Ok(records)
    }

    async fn entries(&self) -> Result<Vec<IndexEntry>, IndexError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM media WHERE album = ?1 ORDER BY id"
            ))
            .map_err(IndexError::query)?;
        let entries = stmt
            .query_map([&self.album], row_to_entry)
            .map_err(IndexError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(IndexError::query)?;
        Ok(entries)
    }

    async fn summary(&self) -> Result<IndexSummary, IndexError> {
        let conn = lock(&self.conn)?;

        let (entries, photos, videos, total_bytes): (i64, i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), \
                        COALESCE(SUM(kind = 'photo'), 0), \
                        COALESCE(SUM(kind = 'video'), 0), \
                        COALESCE(SUM(size_bytes), 0) \
                 FROM media WHERE album = ?1",
                [&self.album],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .map_err(IndexError::query)?;

        let failed: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM failures WHERE album = ?1",
                [&self.album],
                |row| row.get(0),
            )
            .map_err(IndexError::query)?;

        let last_sync: Option<(i64, Option<i64>, i64)> = conn
            .query_row(
                "SELECT started_at, completed_at, interrupted FROM sync_runs WHERE album = ?1 ORDER BY id DESC LIMIT 1",
                [&self.album],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(IndexError::query)?;

        let (last_sync_started, last_sync_completed, last_sync_interrupted) = match last_sync {
            Some((started, completed, interrupted)) => (
                timestamp(started),
                completed.and_then(timestamp),
                interrupted != 0,
            ),
            None => (None, None, false),
        };

        Ok(IndexSummary {
            entries: entries as u64,
            photos: photos as u64,
            videos: videos as u64,
            total_bytes: total_bytes as u64,
            failed: failed as u64,
            last_sync_started,
            last_sync_completed,
            last_sync_interrupted,
        })
    }

    async fn start_sync_run(&self) -> Result<i64, IndexError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO sync_runs (album, started_at) VALUES (?1, ?2)",
            rusqlite::params![&self.album, Utc::now().timestamp()],
        )
        .map_err(IndexError::query)?;
        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncRunStats,
    ) -> Result<(), IndexError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, items_seen = ?2, items_downloaded = ?3, items_skipped = ?4, items_failed = ?5, interrupted = ?6 WHERE id = ?7",
            rusqlite::params![
                Utc::now().timestamp(),
                stats.items_seen as i64,
                stats.items_downloaded as i64,
                stats.items_skipped as i64,
                stats.items_failed as i64,
                i64::from(stats.interrupted),
                run_id
            ],
        )
        .map_err(IndexError::query)?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), IndexError> {
        let conn = lock(&self.conn)?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .map_err(IndexError::query)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const ALBUM: &str = "https://mitene.us/f/abc";

    fn entry(id: &str, path: &Path, content: &[u8]) -> IndexEntry {
        use sha2::{Digest, Sha256};
        IndexEntry {
            identifier: id.to_string(),
            checksum: crate::download::checksum::to_hex(&Sha256::digest(content)),
            local_path: path.to_path_buf(),
            size_bytes: content.len() as u64,
            synced_at: timestamp(1_700_000_000).unwrap(),
            kind: MediaKind::Photo,
        }
    }

    #[tokio::test]
    async fn test_open_creates_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let db = SqliteIndex::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), path);
    }

    #[tokio::test]
    async fn test_lookup_absent() {
        let db = SqliteIndex::open_in_memory().unwrap();
        let index = db.album(ALBUM);
        assert!(index.lookup("nope").await.unwrap().is_none());
        assert!(!index.is_up_to_date("nope", None, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_then_lookup_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"first").unwrap();

        let db = SqliteIndex::open_in_memory().unwrap();
        let index = db.album(ALBUM);
        let first = entry("a", &file, b"first");
        index.record(&first).await.unwrap();
        assert_eq!(index.lookup("a").await.unwrap(), Some(first.clone()));

        // Idempotent upsert, last write wins.
        index.record(&first).await.unwrap();
        let second = entry("a", &file, b"second!");
        index.record(&second).await.unwrap();
        assert_eq!(index.lookup("a").await.unwrap(), Some(second));
        assert_eq!(index.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_entries_are_scoped_by_album() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"x").unwrap();

        let db = SqliteIndex::open_in_memory().unwrap();
        db.album(ALBUM).record(&entry("a", &file, b"x")).await.unwrap();
        assert!(db.album("https://mitene.us/f/other").lookup("a").await.unwrap().is_none());
        assert_eq!(db.known_albums().await.unwrap(), vec![ALBUM.to_string()]);
    }

    #[tokio::test]
    async fn test_up_to_date_requires_file_with_recorded_size() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"content").unwrap();

        let db = SqliteIndex::open_in_memory().unwrap();
        let index = db.album(ALBUM);
        index.record(&entry("a", &file, b"content")).await.unwrap();
        assert!(index.is_up_to_date("a", None, false).await.unwrap());

        fs::write(&file, b"truncated").unwrap();
        assert!(!index.is_up_to_date("a", None, false).await.unwrap());

        fs::remove_file(&file).unwrap();
        assert!(!index.is_up_to_date("a", None, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_up_to_date_verifies_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"content").unwrap();

        let db = SqliteIndex::open_in_memory().unwrap();
        let index = db.album(ALBUM);
        index.record(&entry("a", &file, b"content")).await.unwrap();
        assert!(index.is_up_to_date("a", None, true).await.unwrap());

        // Same size, different bytes: only caught when hashing.
        fs::write(&file, b"CONTENT").unwrap();
        assert!(index.is_up_to_date("a", None, false).await.unwrap());
        assert!(!index.is_up_to_date("a", None, true).await.unwrap());
    }

    #[tokio::test]
    async fn test_up_to_date_compares_remote_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"content").unwrap();

        let db = SqliteIndex::open_in_memory().unwrap();
        let index = db.album(ALBUM);
        let e = entry("a", &file, b"content");
        index.record(&e).await.unwrap();
        assert!(index
            .is_up_to_date("a", Some(&e.checksum.to_uppercase()), false)
            .await
            .unwrap());
        assert!(!index.is_up_to_date("a", Some("deadbeef"), false).await.unwrap());
    }

    #[tokio::test]
    async fn test_failures_counted_and_cleared_on_record() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"x").unwrap();

        let db = SqliteIndex::open_in_memory().unwrap();
        let index = db.album(ALBUM);
        index.record_failure("a", "HTTP 500").await.unwrap();
        index.record_failure("a", "timeout").await.unwrap();

        let failures = index.failures().await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 2);
        assert_eq!(failures[0].last_error, "timeout");
        assert_eq!(index.summary().await.unwrap().failed, 1);

        index.record(&entry("a", &file, b"x")).await.unwrap();
        assert!(index.failures().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_run_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("a.jpg");
        let video = dir.path().join("b.mp4");
        fs::write(&photo, b"12345").unwrap();
        fs::write(&video, b"123").unwrap();

        let db = SqliteIndex::open_in_memory().unwrap();
        let index = db.album(ALBUM);
        let run = index.start_sync_run().await.unwrap();
        index.record(&entry("a", &photo, b"12345")).await.unwrap();
        let mut v = entry("b", &video, b"123");
        v.kind = MediaKind::Video;
        index.record(&v).await.unwrap();
        index
            .complete_sync_run(
                run,
                &SyncRunStats {
                    items_seen: 2,
                    items_downloaded: 2,
                    interrupted: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        index.flush().await.unwrap();

        let summary = index.summary().await.unwrap();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.photos, 1);
        assert_eq!(summary.videos, 1);
        assert_eq!(summary.total_bytes, 8);
        assert!(summary.last_sync_started.is_some());
        assert!(summary.last_sync_completed.is_some());
        assert!(summary.last_sync_interrupted);
    }

    #[tokio::test]
    async fn test_saved_albums() {
        let db = SqliteIndex::open_in_memory().unwrap();
        assert!(db.add_saved_album(ALBUM).await.unwrap());
        assert!(!db.add_saved_album(ALBUM).await.unwrap());
        assert_eq!(db.saved_albums().await.unwrap(), vec![ALBUM.to_string()]);
        assert!(db.remove_saved_album(ALBUM).await.unwrap());
        assert!(!db.remove_saved_album(ALBUM).await.unwrap());
        assert!(db.saved_albums().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"x").unwrap();

        {
            let db = SqliteIndex::open(&path).await.unwrap();
            let index = db.album(ALBUM);
            index.record(&entry("a", &file, b"x")).await.unwrap();
            index.flush().await.unwrap();
        }
        let db = SqliteIndex::open(&path).await.unwrap();
        assert!(db.album(ALBUM).is_up_to_date("a", None, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        fs::write(&path, vec![b'z'; 4096]).unwrap();
        let err = SqliteIndex::open(&path).await.unwrap_err();
        assert!(err.is_corruption(), "{err}");
    }

    #[tokio::test]
    async fn test_foreign_schema_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE media (something TEXT);")
                .unwrap();
        }
        let err = SqliteIndex::open(&path).await.unwrap_err();
        assert!(err.is_corruption(), "{err}");
    }

    #[tokio::test]
    async fn test_open_or_recover_quarantines_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let garbage = vec![b'z'; 4096];
        fs::write(&path, &garbage).unwrap();

        let db = SqliteIndex::open_or_recover(&path).await.unwrap();
        assert!(db.album(ALBUM).entries().await.unwrap().is_empty());

        let quarantined: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("index.db.corrupt-")
            })
            .collect();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(fs::read(quarantined[0].path()).unwrap(), garbage);
    }

    #[test]
    fn test_sidecar_paths() {
        let [wal, shm] = sidecar_paths(Path::new("/state/index.db"));
        assert_eq!(wal, PathBuf::from("/state/index.db-wal"));
        assert_eq!(shm, PathBuf::from("/state/index.db-shm"));
    }
}
