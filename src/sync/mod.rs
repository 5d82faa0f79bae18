//! Synchronizer: the state machine that enumerates an album, decides what is
//! missing, feeds the worker pool and records what arrived.
//!
//! `Enumerating → Dispatching → Draining → Done`, with `Cancelled` reachable
//! from each of them. The local index is written only from here.

pub mod comments;
pub mod events;
pub mod report;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::album::{AlbumError, AlbumReference, AlbumSource, MediaDescriptor, MediaKind, FIRST_PAGE};
use crate::download::{
    sweep_staging, DownloadJob, DownloadOutcome, DownloadResult, MediaSource, OutputLayout,
    PoolConfig, WorkerPool,
};
use crate::index::{IndexEntry, IndexError, LocalIndex, SyncRunStats};
use crate::retry::{self, RetryConfig};

pub use events::{SyncEvent, SyncState};
pub use report::{check_outcome, FailureKind, ItemFailure, SyncReport};

use events::EventSink;

/// Errors that abort a whole run. Per-item failures end up in the report.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Album listing failed: {0}")]
    Album(#[from] AlbumError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Failed to prepare output directory: {0}")]
    Output(#[from] std::io::Error),
}

impl SyncError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, SyncError::Album(AlbumError::Authentication(_)))
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub pool: PoolConfig,
    /// Attempts for a full enumeration when listing hits transient errors.
    pub listing_retry: RetryConfig,
    /// How long in-flight downloads may keep running after cancellation.
    pub grace_period: Duration,
    pub write_comments: bool,
    pub skip_photos: bool,
    pub skip_videos: bool,
    pub dry_run: bool,
    /// Re-hash indexed files instead of trusting their size.
    pub verify_checksums: bool,
}

pub struct Synchronizer {
    albums: Arc<dyn AlbumSource>,
    media: Arc<dyn MediaSource>,
    index: Arc<dyn LocalIndex>,
    layout: OutputLayout,
    options: SyncOptions,
    events: EventSink,
}

impl Synchronizer {
    pub fn new(
        albums: Arc<dyn AlbumSource>,
        media: Arc<dyn MediaSource>,
        index: Arc<dyn LocalIndex>,
        layout: OutputLayout,
        options: SyncOptions,
    ) -> Self {
        Self {
            albums,
            media,
            index,
            layout,
            options,
            events: EventSink::default(),
        }
    }

    pub fn with_events(mut self, tx: UnboundedSender<SyncEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    /// Synchronize `album` into the output layout.
    ///
    /// Returns `Err` only when the run as a whole failed (listing or
    /// authentication, or the index itself). A cancelled run returns `Ok`
    /// with `state == Cancelled`.
    pub async fn run(
        &self,
        album: &AlbumReference,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let mut report = SyncReport::new(album.url());
        let run_id = self.index.start_sync_run().await?;

        let result = self.run_inner(album, cancel, &mut report).await;
        report.elapsed = started.elapsed();

        let stats = SyncRunStats {
            items_seen: report.listed as u64,
            items_downloaded: report.downloaded as u64,
            items_skipped: report.skipped as u64,
            items_failed: report.failures.len() as u64,
            interrupted: result.is_err() || report.is_cancelled(),
        };
        if let Err(e) = self.index.complete_sync_run(run_id, &stats).await {
            tracing::warn!(error = %e, "Failed to record sync run");
        }
        self.index.flush().await?;

        result.map(|()| report)
    }

    async fn run_inner(
        &self,
        album: &AlbumReference,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        self.sweep().await;

        // ── Enumerating ──
        self.set_state(report, SyncState::Enumerating);
        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            listed = self.enumerate_with_retry(album, cancel) => Some(listed),
        };
        let listed = match listed {
            Some(Ok(items)) => items,
            Some(Err(e)) if !cancel.is_cancelled() => return Err(e.into()),
            // A retry loop cut short by cancellation reports its last error.
            _ => {
                self.set_state(report, SyncState::Cancelled);
                return Ok(());
            }
        };

        let todo = self.select_items(listed, report);
        self.events.emit(SyncEvent::Enumerated { total: todo.len() });
        if !self.options.dry_run {
            self.layout.ensure_dirs().await?;
        }

        // ── Dispatching ──
        self.set_state(report, SyncState::Dispatching);
        let mut pool = WorkerPool::new(
            Arc::clone(&self.media),
            self.options.pool,
            cancel.child_token(),
        );
        let mut in_flight: HashMap<String, MediaDescriptor> = HashMap::new();

        let mut todo = todo.into_iter();
        for media in todo.by_ref() {
            if cancel.is_cancelled() {
                break;
            }
            if self.is_present(&media).await {
                report.skipped += 1;
                self.events.emit(SyncEvent::Skipped {
                    identifier: media.identifier.clone(),
                });
                self.persist_comment(&media, report).await;
                continue;
            }
            if self.options.dry_run {
                tracing::info!(
                    "[DRY RUN] Would download {}",
                    self.layout.media_path(&media).display()
                );
                report.planned += 1;
                self.events.emit(SyncEvent::Planned {
                    identifier: media.identifier.clone(),
                });
                continue;
            }
            pool.submit(DownloadJob::new(&media, self.layout.media_path(&media)));
            in_flight.insert(media.identifier.clone(), media);
        }
        // Items never dispatched because of cancellation.
        for media in todo {
            report.abandoned += 1;
            self.events.emit(SyncEvent::Abandoned {
                identifier: media.identifier,
            });
        }

        // ── Draining ──
        self.set_state(report, SyncState::Draining);
        let cancelled = self.drain(&mut pool, &mut in_flight, cancel, report).await;
        report.peak_concurrency = pool.peak_in_flight();

        if cancelled {
            self.set_state(report, SyncState::Cancelled);
            self.sweep().await;
        } else {
            self.set_state(report, SyncState::Done);
        }
        Ok(())
    }

    /// Absorb results in completion order. Returns whether the run was
    /// cancelled.
    async fn drain(
        &self,
        pool: &mut WorkerPool,
        in_flight: &mut HashMap<String, MediaDescriptor>,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> bool {
        let mut deadline = cancel
            .is_cancelled()
            .then(|| tokio::time::Instant::now() + self.options.grace_period);

        loop {
            let next = match deadline {
                None => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::info!(
                            pending = pool.pending(),
                            grace_secs = self.options.grace_period.as_secs(),
                            "Shutdown requested, waiting for in-flight downloads"
                        );
                        deadline = Some(tokio::time::Instant::now() + self.options.grace_period);
                        continue;
                    }
                    next = pool.next_result() => next,
                },
                Some(at) => match tokio::time::timeout_at(at, pool.next_result()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!(
                            pending = pool.pending(),
                            "Grace period over, abandoning remaining downloads"
                        );
                        for result in pool.abandon().await {
                            self.absorb(result, in_flight, report).await;
                        }
                        break;
                    }
                },
            };
            match next {
                Some(result) => self.absorb(result, in_flight, report).await,
                None => break,
            }
        }

        deadline.is_some()
    }

    async fn absorb(
        &self,
        result: DownloadResult,
        in_flight: &mut HashMap<String, MediaDescriptor>,
        report: &mut SyncReport,
    ) {
        let DownloadResult {
            identifier,
            outcome,
        } = result;
        let media = in_flight.remove(&identifier);

        match outcome {
            DownloadOutcome::Success(fetched) => {
                let entry = IndexEntry {
                    identifier: identifier.clone(),
                    checksum: fetched.checksum,
                    local_path: fetched.path,
                    size_bytes: fetched.bytes,
                    synced_at: Utc::now(),
                    kind: media.as_ref().map(|m| m.kind).unwrap_or(MediaKind::Photo),
                };
                match self.index.record(&entry).await {
                    Ok(()) => {
                        tracing::debug!(id = %identifier, path = %entry.local_path.display(), "Downloaded");
                        report.downloaded += 1;
                        report.bytes_downloaded += entry.size_bytes;
                        self.events.emit(SyncEvent::Downloaded {
                            identifier: identifier.clone(),
                            bytes: entry.size_bytes,
                        });
                    }
                    Err(e) => {
                        self.fail(report, &identifier, FailureKind::Permanent, format!("index: {e}"));
                    }
                }
            }
            DownloadOutcome::RetriableFailure(e) => {
                self.record_failure(&identifier, &e.to_string()).await;
                self.fail(report, &identifier, FailureKind::Retriable, e.to_string());
            }
            DownloadOutcome::PermanentFailure(e) => {
                self.record_failure(&identifier, &e.to_string()).await;
                self.fail(report, &identifier, FailureKind::Permanent, e.to_string());
            }
            DownloadOutcome::Cancelled => {
                report.abandoned += 1;
                self.events.emit(SyncEvent::Abandoned { identifier });
                return;
            }
        }

        if let Some(media) = media {
            self.persist_comment(&media, report).await;
        }
    }

    async fn enumerate_with_retry(
        &self,
        album: &AlbumReference,
        cancel: &CancellationToken,
    ) -> Result<Vec<MediaDescriptor>, AlbumError> {
        retry::retry_with_backoff(
            &self.options.listing_retry,
            cancel,
            AlbumError::retry_action,
            || self.enumerate(album),
        )
        .await
    }

    /// Walk every page from the first one.
    async fn enumerate(&self, album: &AlbumReference) -> Result<Vec<MediaDescriptor>, AlbumError> {
        let mut items = Vec::new();
        let mut page = Some(FIRST_PAGE);
        while let Some(token) = page {
            let listed = self.albums.list_media(album, token).await?;
            self.events.emit(SyncEvent::PageListed {
                page: token,
                items: listed.items.len(),
            });
            items.extend(listed.items);
            page = listed.next;
        }
        tracing::info!(items = items.len(), "Enumerated album");
        Ok(items)
    }

    /// Drop duplicates and filtered kinds, keeping listing order.
    fn select_items(&self, listed: Vec<MediaDescriptor>, report: &mut SyncReport) -> Vec<MediaDescriptor> {
        let mut seen = HashSet::with_capacity(listed.len());
        let mut todo = Vec::with_capacity(listed.len());
        for media in listed {
            if !seen.insert(media.identifier.clone()) {
                tracing::debug!(id = %media.identifier, "Duplicate identifier in listing, ignoring");
                continue;
            }
            report.listed += 1;
            let filtered = match media.kind {
                MediaKind::Photo => self.options.skip_photos,
                MediaKind::Video => self.options.skip_videos,
            };
            if filtered {
                report.filtered += 1;
                continue;
            }
            todo.push(media);
        }
        todo
    }

    /// Index lookup; an index that cannot answer counts as "not present".
    /// An entry recorded under another path (a different output directory)
    /// does not count either.
    async fn is_present(&self, media: &MediaDescriptor) -> bool {
        match self.index.lookup(&media.identifier).await {
            Ok(Some(entry)) if entry.local_path != self.layout.media_path(media) => {
                tracing::debug!(
                    id = %media.identifier,
                    recorded = %entry.local_path.display(),
                    "Indexed under another path, downloading again"
                );
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(id = %media.identifier, error = %e, "Index lookup failed, downloading again");
                return false;
            }
        }
        match self
            .index
            .is_up_to_date(
                &media.identifier,
                media.remote_checksum.as_deref(),
                self.options.verify_checksums,
            )
            .await
        {
            Ok(present) => present,
            Err(e) => {
                tracing::warn!(id = %media.identifier, error = %e, "Index lookup failed, downloading again");
                false
            }
        }
    }

    async fn persist_comment(&self, media: &MediaDescriptor, report: &mut SyncReport) {
        if !self.options.write_comments || self.options.dry_run {
            return;
        }
        let Some(text) = &media.comment else {
            return;
        };
        let path = self.layout.comment_path(media);
        match comments::write_comment(&path, text).await {
            Ok(true) => {
                report.comments_written += 1;
                self.events.emit(SyncEvent::CommentWritten {
                    identifier: media.identifier.clone(),
                });
            }
            Ok(false) => {}
            Err(e) => self.fail(
                report,
                &media.identifier,
                FailureKind::Permanent,
                format!("comment {}: {e}", path.display()),
            ),
        }
    }

    async fn record_failure(&self, identifier: &str, reason: &str) {
        if let Err(e) = self.index.record_failure(identifier, reason).await {
            tracing::warn!(id = %identifier, error = %e, "Failed to record failure in index");
        }
    }

    fn fail(&self, report: &mut SyncReport, identifier: &str, kind: FailureKind, reason: String) {
        tracing::warn!(id = %identifier, %kind, "Download failed: {reason}");
        self.events.emit(SyncEvent::Failed {
            identifier: identifier.to_string(),
            kind,
            reason: reason.clone(),
        });
        report.failures.push(ItemFailure {
            identifier: identifier.to_string(),
            kind,
            reason,
        });
    }

    fn set_state(&self, report: &mut SyncReport, state: SyncState) {
        tracing::debug!(from = %report.state, to = %state, "Sync state");
        report.state = state;
        self.events.emit(SyncEvent::StateChanged(state));
    }

    /// Remove staging files left by a crash or an abandoned download.
    async fn sweep(&self) {
        for dir in self.layout.dirs() {
            match sweep_staging(&dir).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(dir = %dir.display(), removed = n, "Removed stale staging files"),
                Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Failed to sweep staging files"),
            }
        }
    }
}
