use std::path::PathBuf;
use std::time::Duration;

use crate::cli::SyncArgs;
use crate::download::PoolConfig;
use crate::retry::RetryConfig;
use crate::sync::SyncOptions;

/// Resolved settings for a `sync` invocation.
pub struct Config {
    pub album_url: Option<String>,
    pub password: Option<String>,
    pub directory: PathBuf,
    pub state_dir: PathBuf,

    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
    pub grace_period_secs: u64,
    pub max_retries: u32,
    pub concurrency: u16,

    pub write_comments: bool,
    pub skip_photos: bool,
    pub skip_videos: bool,
    pub dry_run: bool,
    pub verify_checksums: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("album_url", &self.album_url)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("directory", &self.directory)
            .field("state_dir", &self.state_dir)
            .field("concurrency", &self.concurrency)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(state_dir: &str, args: SyncArgs) -> anyhow::Result<Self> {
        if args.skip_photos && args.skip_videos {
            anyhow::bail!("--skip-photos and --skip-videos together leave nothing to download");
        }
        if args.timeout == 0 {
            anyhow::bail!("--timeout must be at least 1 second");
        }

        Ok(Self {
            album_url: args.url,
            password: args.password.filter(|p| !p.is_empty()),
            directory: expand_tilde(&args.directory),
            state_dir: expand_tilde(state_dir),
            retry_delay_secs: args.retry_delay,
            timeout_secs: args.timeout,
            grace_period_secs: args.grace_period,
            max_retries: args.max_retries,
            concurrency: args.concurrency,
            write_comments: !args.no_comments,
            skip_photos: args.skip_photos,
            skip_videos: args.skip_videos,
            dry_run: args.dry_run,
            verify_checksums: args.verify_checksums,
            no_progress_bar: args.no_progress_bar,
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay_ms: self.retry_delay_secs.saturating_mul(1_000),
            ..RetryConfig::default()
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            pool: PoolConfig {
                concurrency: usize::from(self.concurrency),
                retry: self.retry_config(),
                attempt_timeout: Duration::from_secs(self.timeout_secs),
            },
            listing_retry: self.retry_config(),
            grace_period: Duration::from_secs(self.grace_period_secs),
            write_comments: self.write_comments,
            skip_photos: self.skip_photos,
            skip_videos: self.skip_videos,
            dry_run: self.dry_run,
            verify_checksums: self.verify_checksums,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;

    fn sync_args(extra: &[&str]) -> SyncArgs {
        let args = ["mitene-sync", "sync"].iter().chain(extra.iter()).copied();
        match Cli::try_parse_from(args).unwrap().command {
            Command::Sync(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Documents");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Documents"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(expand_tilde("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_tilde("relative/path"), PathBuf::from("relative/path"));
    }

    #[test]
    fn test_sync_options_follow_flags() {
        let cfg = Config::from_cli(
            "/state",
            sync_args(&["--no-comments", "--skip-videos", "-c", "6", "--timeout", "30", "--max-retries", "5"]),
        )
        .unwrap();
        let opts = cfg.sync_options();
        assert!(!opts.write_comments);
        assert!(opts.skip_videos);
        assert!(!opts.skip_photos);
        assert_eq!(opts.pool.concurrency, 6);
        assert_eq!(opts.pool.attempt_timeout, Duration::from_secs(30));
        assert_eq!(opts.pool.retry.max_retries, 5);
        assert_eq!(opts.listing_retry.max_retries, 5);
        assert_eq!(opts.grace_period, Duration::from_secs(10));
        assert_eq!(cfg.state_dir, PathBuf::from("/state"));
    }

    #[test]
    fn test_retry_delay_in_seconds() {
        let cfg = Config::from_cli("/s", sync_args(&["--retry-delay", "2"])).unwrap();
        assert_eq!(cfg.retry_config().base_delay_ms, 2_000);
        assert_eq!(cfg.retry_config().max_delay_ms, 60_000);
    }

    #[test]
    fn test_skipping_everything_is_rejected() {
        assert!(Config::from_cli("/s", sync_args(&["--skip-photos", "--skip-videos"])).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let cfg = Config::from_cli("/s", sync_args(&["--password", "hunter2"])).unwrap();
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }
}
