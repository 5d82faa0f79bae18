use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "mitene-sync",
    version,
    about = "Mirror the photos, videos and comments of a mitene shared album"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the local index
    #[arg(long, global = true, default_value = "~/.mitene-sync")]
    pub state_dir: String,

    /// Log level (RUST_LOG overrides it)
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download new media and comments from an album, or from every saved album
    Sync(SyncArgs),

    /// Manage the saved album list
    Albums {
        #[command(subcommand)]
        action: AlbumsAction,
    },

    /// Show what the index knows about an album
    Status(StatusArgs),

    /// Check that indexed files are still on disk
    Verify(VerifyArgs),

    /// Delete the local index
    ResetState(ResetStateArgs),
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Album URL, e.g. https://mitene.us/f/abcd1234 (default: saved albums)
    pub url: Option<String>,

    /// Album password, if the album is protected.
    /// WARNING: passing via --password is visible in process listings.
    /// Prefer the MITENE_PASSWORD environment variable instead.
    #[arg(short = 'p', long, env = "MITENE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Local directory for downloads
    #[arg(short = 'd', long, default_value = "out")]
    pub directory: String,

    /// Don't write comment files
    #[arg(long)]
    pub no_comments: bool,

    /// Don't download photos
    #[arg(long)]
    pub skip_photos: bool,

    /// Don't download videos
    #[arg(long)]
    pub skip_videos: bool,

    /// List what would be downloaded without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Re-hash indexed files with SHA-256 before skipping them.
    /// By default an indexed file is trusted when its size matches, so a
    /// same-size corruption goes unnoticed without this flag.
    #[arg(long)]
    pub verify_checksums: bool,

    /// Number of concurrent downloads
    #[arg(short = 'c', long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub concurrency: u16,

    /// Retries for transient failures, per item and for the listing
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Base delay in seconds between retries
    #[arg(long, default_value_t = 1)]
    pub retry_delay: u64,

    /// Per-attempt download timeout in seconds
    #[arg(long, default_value_t = 1200)]
    pub timeout: u64,

    /// Seconds in-flight downloads may run after Ctrl+C
    #[arg(long, default_value_t = 10)]
    pub grace_period: u64,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[derive(Subcommand, Debug)]
pub enum AlbumsAction {
    /// Save an album URL for `sync` without arguments
    Add { url: String },
    /// List saved albums
    List,
    /// Forget a saved album (its index entries are kept)
    Remove { url: String },
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Album URL (default: every album in the index)
    pub url: Option<String>,

    /// List items whose last download failed
    #[arg(long)]
    pub failed: bool,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Album URL (default: every album in the index)
    pub url: Option<String>,

    /// Also compare SHA-256 checksums (slow)
    #[arg(long)]
    pub checksums: bool,
}

#[derive(Args, Debug)]
pub struct ResetStateArgs {
    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}
