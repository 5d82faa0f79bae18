//! Bounded pool of download tasks.
//!
//! Every submitted job gets its own tokio task right away, but a task only
//! starts fetching once it holds one of `concurrency` semaphore permits, so
//! submitting never blocks and at most `concurrency` transfers run at once.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use super::error::DownloadError;
use super::file::{fetch_media, FetchRequest, FetchedFile};
use super::source::MediaSource;
use crate::album::MediaDescriptor;
use crate::retry::RetryConfig;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub concurrency: usize,
    pub retry: RetryConfig,
    pub attempt_timeout: Duration,
}

/// One media item to fetch to `final_path`.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub identifier: String,
    pub uri: String,
    pub final_path: PathBuf,
    pub expected_size: Option<u64>,
    pub expected_checksum: Option<String>,
    pub modified: Option<DateTime<Utc>>,
}

impl DownloadJob {
    pub fn new(media: &MediaDescriptor, final_path: PathBuf) -> Self {
        Self {
            identifier: media.identifier.clone(),
            uri: media.remote_uri.clone(),
            final_path,
            expected_size: media.expected_size,
            expected_checksum: media.remote_checksum.clone(),
            modified: media.taken_at,
        }
    }

    fn request(&self) -> FetchRequest<'_> {
        FetchRequest {
            uri: &self.uri,
            final_path: &self.final_path,
            expected_size: self.expected_size,
            expected_checksum: self.expected_checksum.as_deref(),
            modified: self.modified,
        }
    }
}

#[derive(Debug)]
pub enum DownloadOutcome {
    Success(FetchedFile),
    /// Transient errors outlasted every attempt.
    RetriableFailure(DownloadError),
    PermanentFailure(DownloadError),
    /// Stopped by cancellation; neither a success nor a failure.
    Cancelled,
}

#[derive(Debug)]
pub struct DownloadResult {
    pub identifier: String,
    pub outcome: DownloadOutcome,
}

pub struct WorkerPool {
    source: Arc<dyn MediaSource>,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    in_flight: FuturesUnordered<BoxFuture<'static, DownloadResult>>,
    abort_handles: Vec<AbortHandle>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// Decrements the active counter when a fetch ends, however it ends.
struct ActiveSlot(Arc<AtomicUsize>);

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    /// `cancel` should be a child of the run's token so cancelling the run
    /// reaches every worker.
    pub fn new(source: Arc<dyn MediaSource>, config: PoolConfig, cancel: CancellationToken) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            source,
            config,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            cancel,
            in_flight: FuturesUnordered::new(),
            abort_handles: Vec::new(),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a job. Returns immediately; the result comes out of
    /// [`WorkerPool::next_result`].
    pub fn submit(&mut self, job: DownloadJob) {
        let identifier = job.identifier.clone();
        let source = Arc::clone(&self.source);
        let semaphore = Arc::clone(&self.semaphore);
        let cancel = self.cancel.clone();
        let active = Arc::clone(&self.active);
        let peak = Arc::clone(&self.peak);
        let config = self.config;

        let handle = tokio::spawn(async move {
            let outcome = run_job(&*source, &job, &config, &semaphore, &cancel, active, peak).await;
            DownloadResult {
                identifier: job.identifier,
                outcome,
            }
        });
        self.abort_handles.push(handle.abort_handle());

        self.in_flight.push(
            async move {
                match handle.await {
                    Ok(result) => result,
                    Err(e) if e.is_cancelled() => DownloadResult {
                        identifier,
                        outcome: DownloadOutcome::Cancelled,
                    },
                    Err(e) => DownloadResult {
                        identifier,
                        outcome: DownloadOutcome::PermanentFailure(DownloadError::Disk(
                            std::io::Error::other(format!("download task panicked: {e}")),
                        )),
                    },
                }
            }
            .boxed(),
        );
    }

    /// Next finished job in completion order, or `None` when nothing is
    /// outstanding.
    pub async fn next_result(&mut self) -> Option<DownloadResult> {
        self.in_flight.next().await
    }

    /// Jobs submitted whose result has not been taken yet.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Highest number of fetches that ran at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Abort every task still running and return what they left behind.
    ///
    /// Aborted tasks may leave a staging file; callers sweep the output
    /// directories afterwards.
    pub async fn abandon(&mut self) -> Vec<DownloadResult> {
        self.cancel.cancel();
        for handle in self.abort_handles.drain(..) {
            handle.abort();
        }
        let mut left = Vec::with_capacity(self.in_flight.len());
        while let Some(result) = self.in_flight.next().await {
            left.push(result);
        }
        left
    }
}

async fn run_job(
    source: &dyn MediaSource,
    job: &DownloadJob,
    config: &PoolConfig,
    semaphore: &Semaphore,
    cancel: &CancellationToken,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
) -> DownloadOutcome {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return DownloadOutcome::Cancelled,
        permit = semaphore.acquire() => match permit {
            Ok(permit) => permit,
            Err(_) => return DownloadOutcome::Cancelled,
        },
    };
    if cancel.is_cancelled() {
        return DownloadOutcome::Cancelled;
    }

    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
    peak.fetch_max(now, Ordering::SeqCst);
    let _slot = ActiveSlot(active);

    tracing::debug!(id = %job.identifier, path = %job.final_path.display(), "Downloading");
    match fetch_media(
        source,
        &job.request(),
        &config.retry,
        config.attempt_timeout,
        cancel,
    )
    .await
    {
        Ok(fetched) => DownloadOutcome::Success(fetched),
        Err(DownloadError::Cancelled) => DownloadOutcome::Cancelled,
        // Backoff was cut short; the last error is not the real outcome.
        Err(_) if cancel.is_cancelled() => DownloadOutcome::Cancelled,
        Err(e) if e.is_retryable() => DownloadOutcome::RetriableFailure(e),
        Err(e) => DownloadOutcome::PermanentFailure(e),
    }
}
