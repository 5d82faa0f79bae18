use std::time::Duration;

use thiserror::Error;

use super::events::SyncState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient errors outlasted every retry; a later run may succeed.
    Retriable,
    Permanent,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Retriable => f.write_str("retriable"),
            FailureKind::Permanent => f.write_str("permanent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub identifier: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Outcome of one synchronization run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub album: String,
    /// `Done` or `Cancelled`.
    pub state: SyncState,
    /// Unique items the listing produced, before filters.
    pub listed: usize,
    pub downloaded: usize,
    /// Already present and intact.
    pub skipped: usize,
    /// Dropped by `--skip-photos` / `--skip-videos`.
    pub filtered: usize,
    /// Would have been downloaded (dry run).
    pub planned: usize,
    /// Stopped by cancellation.
    pub abandoned: usize,
    pub comments_written: usize,
    pub bytes_downloaded: u64,
    pub failures: Vec<ItemFailure>,
    pub peak_concurrency: usize,
    pub elapsed: Duration,
}

impl SyncReport {
    pub(crate) fn new(album: &str) -> Self {
        Self {
            album: album.to_string(),
            state: SyncState::Enumerating,
            listed: 0,
            downloaded: 0,
            skipped: 0,
            filtered: 0,
            planned: 0,
            abandoned: 0,
            comments_written: 0,
            bytes_downloaded: 0,
            failures: Vec::new(),
            peak_concurrency: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == SyncState::Cancelled
    }

    pub fn permanent_failures(&self) -> impl Iterator<Item = &ItemFailure> {
        self.failures
            .iter()
            .filter(|f| f.kind == FailureKind::Permanent)
    }

    pub fn log_summary(&self) {
        tracing::info!("── Summary: {} ──", self.album);
        if self.planned > 0 {
            tracing::info!("  [DRY RUN] {} would be downloaded", self.planned);
        }
        tracing::info!(
            "  {} downloaded, {} skipped, {} failed",
            self.downloaded,
            self.skipped,
            self.failures.len()
        );
        if self.filtered > 0 {
            tracing::info!("  {} filtered out", self.filtered);
        }
        if self.comments_written > 0 {
            tracing::info!("  {} comment files written", self.comments_written);
        }
        if self.is_cancelled() {
            tracing::warn!("  interrupted, {} items abandoned", self.abandoned);
        }
        tracing::info!(
            "  {} transferred, elapsed: {}",
            format_bytes(self.bytes_downloaded),
            format_duration(self.elapsed)
        );
        for failure in &self.failures {
            tracing::error!(
                "  {} [{}]: {}",
                failure.identifier,
                failure.kind,
                failure.reason
            );
        }
    }
}

/// Why a `sync` invocation exits non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RunFailure {
    #[error("{0} album(s) could not be synchronized")]
    Albums(usize),

    #[error("{0} item(s) failed permanently")]
    PermanentItems(usize),
}

/// Exit decision over every album's report. Albums that failed as a whole
/// take precedence; items whose transient errors outlasted the retries do
/// not fail the run.
pub fn check_outcome(reports: &[SyncReport], failed_albums: usize) -> Result<(), RunFailure> {
    if failed_albums > 0 {
        return Err(RunFailure::Albums(failed_albums));
    }
    let permanent: usize = reports.iter().map(|r| r.permanent_failures().count()).sum();
    if permanent > 0 {
        return Err(RunFailure::PermanentItems(permanent));
    }
    Ok(())
}

pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 01m 01s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_permanent_failures_filter() {
        let mut report = SyncReport::new("a");
        report.failures.push(ItemFailure {
            identifier: "x".into(),
            kind: FailureKind::Retriable,
            reason: "HTTP 503".into(),
        });
        assert_eq!(report.permanent_failures().count(), 0);
        report.failures.push(ItemFailure {
            identifier: "y".into(),
            kind: FailureKind::Permanent,
            reason: "HTTP 404".into(),
        });
        assert_eq!(report.permanent_failures().count(), 1);
    }

    fn report_with(kinds: &[FailureKind]) -> SyncReport {
        let mut report = SyncReport::new("https://mitene.us/f/abc");
        report.state = SyncState::Done;
        for (i, kind) in kinds.iter().enumerate() {
            report.failures.push(ItemFailure {
                identifier: format!("item{i}"),
                kind: *kind,
                reason: "failed".into(),
            });
        }
        report
    }

    #[test]
    fn test_clean_run_succeeds() {
        assert_eq!(check_outcome(&[report_with(&[]), report_with(&[])], 0), Ok(()));
        assert_eq!(check_outcome(&[], 0), Ok(()));
    }

    #[test]
    fn test_permanent_item_failure_fails_run() {
        let reports = [
            report_with(&[FailureKind::Permanent]),
            report_with(&[FailureKind::Retriable, FailureKind::Permanent]),
        ];
        let err = check_outcome(&reports, 0).unwrap_err();
        assert_eq!(err, RunFailure::PermanentItems(2));
        assert_eq!(err.to_string(), "2 item(s) failed permanently");
    }

    #[test]
    fn test_failed_album_fails_run() {
        let err = check_outcome(&[report_with(&[FailureKind::Permanent])], 1).unwrap_err();
        assert_eq!(err, RunFailure::Albums(1));
        assert_eq!(err.to_string(), "1 album(s) could not be synchronized");
    }

    #[test]
    fn test_only_retriable_failures_succeed() {
        let reports = [report_with(&[FailureKind::Retriable, FailureKind::Retriable])];
        assert_eq!(check_outcome(&reports, 0), Ok(()));
    }
}
