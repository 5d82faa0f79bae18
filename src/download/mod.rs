//! Download worker pool: streams media bytes into staging files, verifies
//! them and renames them into place, with bounded concurrency and
//! exponential-backoff retries on transient failures.

pub mod checksum;
pub mod error;
pub mod file;
pub mod paths;
pub mod pool;
pub mod source;

pub use file::sweep_staging;
pub use paths::OutputLayout;
pub use pool::{DownloadJob, DownloadOutcome, DownloadResult, PoolConfig, WorkerPool};
pub use source::MediaSource;
