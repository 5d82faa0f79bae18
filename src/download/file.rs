use std::fs::FileTimes;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::checksum::to_hex;
use super::error::DownloadError;
use super::source::{MediaSource, MediaStream};
use crate::retry::{self, RetryConfig};

const STAGING_SUFFIX: &str = ".part";

/// One file to fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub uri: &'a str,
    pub final_path: &'a Path,
    pub expected_size: Option<u64>,
    pub expected_checksum: Option<&'a str>,
    /// Becomes the file's modification time.
    pub modified: Option<DateTime<Utc>>,
}

/// A file that made it to its final path.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedFile {
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the content.
    pub checksum: String,
    pub bytes: u64,
}

/// Hidden staging file next to the final path, so the closing rename never
/// crosses filesystems.
pub fn staging_path(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = final_path.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".{name}{STAGING_SUFFIX}"))
}

fn is_staging_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(STAGING_SUFFIX) && name.len() > 1 + STAGING_SUFFIX.len()
}

/// Remove staging files left behind in `dir` by an interrupted run.
///
/// Returns the number of files removed. A missing directory is not an error.
pub async fn sweep_staging(dir: &Path) -> std::io::Result<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if !is_staging_name(&name.to_string_lossy()) {
            continue;
        }
        match fs::remove_file(entry.path()).await {
            Ok(()) => {
                tracing::debug!(path = %entry.path().display(), "Removed stale staging file");
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

/// Download one file through a staging file, retrying transient failures.
///
/// Every attempt starts from an empty staging file and is bounded by
/// `attempt_timeout`. The final path is only ever written by a rename of a
/// fully received and verified staging file, and the staging file is removed
/// whenever the call fails.
pub async fn fetch_media(
    source: &dyn MediaSource,
    request: &FetchRequest<'_>,
    retry_config: &RetryConfig,
    attempt_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<FetchedFile, DownloadError> {
    let part_path = staging_path(request.final_path);

    let result = retry::retry_with_backoff(
        retry_config,
        cancel,
        DownloadError::retry_action,
        || async {
            let _ = fs::remove_file(&part_path).await;
            match tokio::time::timeout(
                attempt_timeout,
                attempt_fetch(source, request, &part_path, cancel),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(DownloadError::Timeout {
                    uri: request.uri.to_string(),
                    after: attempt_timeout,
                }),
            }
        },
    )
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&part_path).await;
    }
    result
}

/// Single attempt: stream into the staging file, verify, rename.
async fn attempt_fetch(
    source: &dyn MediaSource,
    request: &FetchRequest<'_>,
    part_path: &Path,
    cancel: &CancellationToken,
) -> Result<FetchedFile, DownloadError> {
    let MediaStream {
        content_length,
        mut body,
    } = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        opened = source.open(request.uri) => opened?,
    };

    if let (Some(expected), Some(announced)) = (request.expected_size, content_length) {
        if expected != announced {
            return Err(DownloadError::SizeMismatch {
                uri: request.uri.to_string(),
                expected,
                actual: announced,
            });
        }
    }

    let mut file = fs::File::create(part_path).await?;
    // Incremental SHA-256; the body is never held in memory as a whole.
    let mut hasher = Sha256::new();
    let mut bytes_written: u64 = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            next = body.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| match e {
            DownloadError::Http { uri, reason, .. } => {
                tracing::debug!(
                    uri = %uri,
                    bytes_so_far = bytes_written,
                    content_length = ?content_length,
                    "Body stream error: {reason}"
                );
                DownloadError::Http {
                    uri,
                    reason,
                    bytes_written,
                }
            }
            other => other,
        })?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if let Some(announced) = content_length {
        if bytes_written != announced {
            return Err(DownloadError::Http {
                uri: request.uri.to_string(),
                reason: format!("body ended at {bytes_written} of {announced} announced bytes"),
                bytes_written,
            });
        }
    }
    if let Some(expected) = request.expected_size {
        if bytes_written != expected {
            return Err(DownloadError::SizeMismatch {
                uri: request.uri.to_string(),
                expected,
                actual: bytes_written,
            });
        }
    }

    let checksum = to_hex(&hasher.finalize());
    if let Some(expected) = request.expected_checksum {
        if !expected.eq_ignore_ascii_case(&checksum) {
            return Err(DownloadError::ChecksumMismatch {
                uri: request.uri.to_string(),
                expected: expected.to_string(),
                actual: checksum,
            });
        }
    }

    fs::rename(part_path, request.final_path).await?;

    if let Some(modified) = request.modified {
        let path = request.final_path.to_path_buf();
        let ts = modified.timestamp();
        match tokio::task::spawn_blocking(move || set_file_mtime(&path, ts)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                path = %request.final_path.display(),
                error = %e,
                "Could not set mtime"
            ),
            Err(e) => tracing::warn!(error = %e, "mtime task failed"),
        }
    }

    Ok(FetchedFile {
        path: request.final_path.to_path_buf(),
        checksum,
        bytes: bytes_written,
    })
}

fn set_file_mtime(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let time = if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(timestamp.unsigned_abs()))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    };
    let times = FileTimes::new().set_modified(time).set_accessed(time);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::source::fake::{FakeSource, Reply};
    use chrono::TimeZone;

    const URI: &str = "https://mitene.us/f/abc/media_files/p1/download";

    fn no_delay(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    fn request(path: &Path) -> FetchRequest<'_> {
        FetchRequest {
            uri: URI,
            final_path: path,
            expected_size: None,
            expected_checksum: None,
            modified: None,
        }
    }

    fn sha(data: &[u8]) -> String {
        to_hex(&Sha256::digest(data))
    }

    fn dir_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_staging_path() {
        assert_eq!(
            staging_path(Path::new("/out/photos/2023-01-01_000000-p1.jpg")),
            PathBuf::from("/out/photos/.2023-01-01_000000-p1.jpg.part")
        );
    }

    #[tokio::test]
    async fn test_fetch_writes_verified_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p1.jpg");
        let data = b"some jpeg bytes".to_vec();
        let source = FakeSource::new();
        source.reply(URI, [Reply::Body(data.clone())]);

        let taken = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        let expected_checksum = sha(&data);
        let mut req = request(&path);
        req.expected_size = Some(data.len() as u64);
        req.expected_checksum = Some(&expected_checksum);
        req.modified = Some(taken);

        let fetched = fetch_media(
            &source,
            &req,
            &no_delay(3),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(fetched.path, path);
        assert_eq!(fetched.bytes, data.len() as u64);
        assert_eq!(fetched.checksum, expected_checksum);
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(dir_names(dir.path()), vec!["p1.jpg"]);

        let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(
            mtime.duration_since(UNIX_EPOCH).unwrap().as_secs() as i64,
            taken.timestamp()
        );
    }

    #[tokio::test]
    async fn test_not_found_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p1.jpg");
        let source = FakeSource::new();
        source.reply(URI, [Reply::Status(404)]);

        let err = fetch_media(
            &source,
            &request(&path),
            &no_delay(3),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DownloadError::HttpStatus { status: 404, .. }));
        assert_eq!(source.opens(), 1);
        assert!(dir_names(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p1.jpg");
        let source = FakeSource::new();
        source.reply(
            URI,
            [
                Reply::Status(503),
                Reply::Truncated(b"half".to_vec()),
                Reply::Body(b"whole body".to_vec()),
            ],
        );

        let fetched = fetch_media(
            &source,
            &request(&path),
            &no_delay(3),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(fetched.bytes, 10);
        assert_eq!(source.opens(), 3);
        assert_eq!(dir_names(dir.path()), vec!["p1.jpg"]);
    }

    #[tokio::test]
    async fn test_rate_limit_waits_for_retry_after() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p1.jpg");
        let source = FakeSource::new();
        source.reply(
            URI,
            [
                Reply::StatusRetryAfter(429, Duration::from_millis(300)),
                Reply::Body(b"whole body".to_vec()),
            ],
        );

        let started = std::time::Instant::now();
        let fetched = fetch_media(
            &source,
            &request(&path),
            &no_delay(3),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(fetched.bytes, 10);
        assert_eq!(source.opens(), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p1.jpg");
        let source = FakeSource::new();
        source.reply(URI, [Reply::Truncated(b"partial".to_vec())]);

        let err = fetch_media(
            &source,
            &request(&path),
            &no_delay(2),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, DownloadError::Http { bytes_written: 7, .. }));
        assert_eq!(source.opens(), 3);
        assert!(dir_names(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p1.jpg");
        let source = FakeSource::new();
        source.reply(URI, [Reply::Body(b"tampered".to_vec())]);

        let wrong = sha(b"original");
        let mut req = request(&path);
        req.expected_checksum = Some(&wrong);
        let err = fetch_media(
            &source,
            &req,
            &no_delay(3),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DownloadError::ChecksumMismatch { .. }));
        assert_eq!(source.opens(), 1);
        assert!(dir_names(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_size_mismatch_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p1.jpg");
        let source = FakeSource::new();
        source.reply(URI, [Reply::Body(b"12345".to_vec())]);

        let mut req = request(&path);
        req.expected_size = Some(4);
        let err = fetch_media(
            &source,
            &req,
            &no_delay(3),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::SizeMismatch {
                expected: 4,
                actual: 5,
                ..
            }
        ));
        assert_eq!(source.opens(), 1);
    }

    #[tokio::test]
    async fn test_stalled_attempt_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p1.jpg");
        let source = FakeSource::new();
        source.reply(URI, [Reply::Stall]);

        let err = fetch_media(
            &source,
            &request(&path),
            &no_delay(1),
            Duration::from_millis(50),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DownloadError::Timeout { .. }));
        assert_eq!(source.opens(), 2);
        assert!(dir_names(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_transfer_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p1.jpg");
        let source = FakeSource::new();
        source.reply(URI, [Reply::Stall]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = fetch_media(
            &source,
            &request(&path),
            &no_delay(3),
            Duration::from_secs(30),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DownloadError::Cancelled));
        assert_eq!(source.opens(), 1);
        assert!(dir_names(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_sweep_staging() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".p1.jpg.part"), b"x").unwrap();
        std::fs::write(dir.path().join(".p2.mp4.part"), b"x").unwrap();
        std::fs::write(dir.path().join("p3.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.part"), b"x").unwrap();

        assert_eq!(sweep_staging(dir.path()).await.unwrap(), 2);
        assert_eq!(dir_names(dir.path()), vec!["notes.part", "p3.jpg"]);
        assert_eq!(
            sweep_staging(&dir.path().join("missing")).await.unwrap(),
            0
        );
    }
}
