//! mitene-sync: mirrors the photos, videos and comment threads of a mitene
//! shared album into a local directory.
//!
//! Each run lists the album page by page, skips items the local index says
//! are already on disk and intact, and downloads the rest through a bounded
//! pool with checksum verification and exponential-backoff retries.

#![warn(clippy::all)]

mod album;
mod cli;
mod config;
mod download;
mod index;
mod progress;
pub mod retry;
mod shutdown;
mod sync;
mod types;

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use album::{AlbumError, AlbumReference, AlbumSource, AuthFailure, MiteneClient};
use cli::{AlbumsAction, Command};
use index::{IndexLock, LocalIndex, SqliteIndex};
use sync::{SyncError, SyncReport, Synchronizer};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const LISTING_TIMEOUT: Duration = Duration::from_secs(60);

/// Lock the state directory and open its index, recovering from corruption.
async fn open_index(state_dir: &Path) -> anyhow::Result<(IndexLock, SqliteIndex)> {
    tokio::fs::create_dir_all(state_dir)
        .await
        .with_context(|| format!("Failed to create state directory {}", state_dir.display()))?;
    let lock = IndexLock::acquire(state_dir).await?;
    let db = SqliteIndex::open_or_recover(&state_dir.join(index::INDEX_FILE)).await?;
    tracing::debug!(path = %db.path().display(), "Index opened");
    Ok((lock, db))
}

/// Open an existing index for reading, or `None` if there is none yet.
async fn open_existing_index(state_dir: &Path) -> anyhow::Result<Option<SqliteIndex>> {
    let db_path = state_dir.join(index::INDEX_FILE);
    if !db_path.exists() {
        println!("No index found at {}", db_path.display());
        println!("Run a sync first to create it.");
        return Ok(None);
    }
    Ok(Some(SqliteIndex::open(&db_path).await?))
}

/// Album keys to report on: the given URL, or everything the index knows.
async fn albums_for(db: &SqliteIndex, url: Option<&str>) -> anyhow::Result<Vec<String>> {
    match url {
        Some(url) => Ok(vec![AlbumReference::parse(url, None)?.key().to_string()]),
        None => Ok(db.known_albums().await?),
    }
}

fn prompt_password(album: &AlbumReference) -> Option<String> {
    let prompt = format!("Password for {}: ", album.url());
    tokio::task::block_in_place(|| rpassword::prompt_password(prompt).ok()).filter(|p| !p.is_empty())
}

/// Sync one album, prompting once for a password if the album needs one
/// and we are attached to a terminal.
async fn sync_album(
    config: &config::Config,
    http: &reqwest::Client,
    db: &SqliteIndex,
    mut album: AlbumReference,
    cancel: &CancellationToken,
) -> Result<SyncReport, SyncError> {
    let albums: Arc<dyn AlbumSource> =
        Arc::new(MiteneClient::new(http.clone(), LISTING_TIMEOUT));
    let mut prompted = false;

    loop {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let reporter = progress::spawn_reporter(progress::create_progress_bar(config.no_progress_bar), rx);
        let synchronizer = Synchronizer::new(
            Arc::clone(&albums),
            Arc::new(http.clone()),
            Arc::new(db.album(album.key())),
            download::OutputLayout::new(&config.directory),
            config.sync_options(),
        )
        .with_events(tx);

        let result = synchronizer.run(&album, cancel).await;
        drop(synchronizer);
        if let Err(e) = reporter.await {
            tracing::debug!(error = %e, "Progress reporter ended abnormally");
        }

        match result {
            Err(SyncError::Album(AlbumError::Authentication(AuthFailure::Missing)))
                if !prompted && std::io::stdin().is_terminal() =>
            {
                prompted = true;
                match prompt_password(&album) {
                    Some(password) => album = album.with_password(password),
                    None => return Err(AlbumError::Authentication(AuthFailure::Missing).into()),
                }
            }
            other => return other,
        }
    }
}

async fn run_sync(config: config::Config) -> anyhow::Result<()> {
    tracing::debug!(?config, "Resolved configuration");
    let (_lock, db) = open_index(&config.state_dir).await?;

    let urls = match &config.album_url {
        Some(url) => vec![url.clone()],
        None => db.saved_albums().await?,
    };
    if urls.is_empty() {
        anyhow::bail!(
            "No album given and no saved albums.\n\
             Pass an album URL or run `mitene-sync albums add <URL>` first."
        );
    }

    let http = album::build_http_client(CONNECT_TIMEOUT)?;
    let shutdown_token = shutdown::install_signal_handler()?;
    tracing::info!(
        albums = urls.len(),
        concurrency = config.concurrency,
        directory = %config.directory.display(),
        "Starting mitene-sync"
    );

    let mut reports = Vec::with_capacity(urls.len());
    let mut failed_albums = 0usize;

    for url in &urls {
        if shutdown_token.is_cancelled() {
            break;
        }
        let album = AlbumReference::parse(url, config.password.clone())?;
        tracing::info!(album = %album.url(), "Synchronizing");

        match sync_album(&config, &http, &db, album, &shutdown_token).await {
            Ok(report) => {
                report.log_summary();
                let cancelled = report.is_cancelled();
                reports.push(report);
                if cancelled {
                    tracing::warn!("Sync interrupted, run again to pick up the remaining items");
                    break;
                }
            }
            Err(e) => {
                failed_albums += 1;
                if e.is_authentication() {
                    tracing::error!(album = %url, "{e}. Pass the album password with --password or MITENE_PASSWORD");
                } else {
                    tracing::error!(album = %url, "{e}");
                }
            }
        }
    }

    sync::check_outcome(&reports, failed_albums)?;
    Ok(())
}

async fn run_albums(state_dir: &Path, action: AlbumsAction) -> anyhow::Result<()> {
    let (_lock, db) = open_index(state_dir).await?;
    match action {
        AlbumsAction::Add { url } => {
            let album = AlbumReference::parse(&url, None)?;
            if db.add_saved_album(album.url()).await? {
                println!("Saved {}", album.url());
            } else {
                println!("{} is already saved", album.url());
            }
        }
        AlbumsAction::List => {
            let albums = db.saved_albums().await?;
            if albums.is_empty() {
                println!("No saved albums.");
            }
            for url in albums {
                println!("  {url}");
            }
        }
        AlbumsAction::Remove { url } => {
            let album = AlbumReference::parse(&url, None)?;
            if db.remove_saved_album(album.url()).await? {
                println!("Removed {}", album.url());
            } else {
                anyhow::bail!("{} is not a saved album", album.url());
            }
        }
    }
    Ok(())
}

async fn run_status(state_dir: &Path, args: cli::StatusArgs) -> anyhow::Result<()> {
    let Some(db) = open_existing_index(state_dir).await? else {
        return Ok(());
    };
    println!("Index: {}", db.path().display());

    for key in albums_for(&db, args.url.as_deref()).await? {
        let index = db.album(&key);
        let summary = index.summary().await?;

        println!();
        println!("{key}");
        println!("  Items:   {} ({} photos, {} videos)", summary.entries, summary.photos, summary.videos);
        println!("  Size:    {} bytes", summary.total_bytes);
        println!("  Failed:  {}", summary.failed);
        if let Some(started) = &summary.last_sync_started {
            println!("  Last sync started:   {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        if let Some(completed) = &summary.last_sync_completed {
            let note = if summary.last_sync_interrupted { " (interrupted)" } else { "" };
            println!(
                "  Last sync completed: {}{note}",
                completed.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }

        if args.failed && summary.failed > 0 {
            println!("  Failed items:");
            for failure in index.failures().await? {
                println!(
                    "    {} ({} attempts, {}): {}",
                    failure.identifier,
                    failure.attempts,
                    failure.failed_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    failure.last_error
                );
            }
        }
    }
    Ok(())
}

async fn run_verify(state_dir: &Path, args: cli::VerifyArgs) -> anyhow::Result<()> {
    let Some(db) = open_existing_index(state_dir).await? else {
        return Ok(());
    };

    let mut missing = 0;
    let mut corrupted = 0;
    let mut verified = 0;

    for key in albums_for(&db, args.url.as_deref()).await? {
        let entries = db.album(&key).entries().await?;
        println!("Verifying {} items of {key}...", entries.len());

        for entry in &entries {
            let path = &entry.local_path;
            let size = match tokio::fs::metadata(path).await {
                Ok(meta) => meta.len(),
                Err(_) => {
                    println!("MISSING: {} ({})", path.display(), entry.identifier);
                    missing += 1;
                    continue;
                }
            };
            if size != entry.size_bytes {
                println!(
                    "CORRUPTED: {} ({}) size {} != {}",
                    path.display(),
                    entry.identifier,
                    size,
                    entry.size_bytes
                );
                corrupted += 1;
                continue;
            }
            if args.checksums {
                match download::checksum::sha256_file(path).await {
                    Ok(actual) if actual.eq_ignore_ascii_case(&entry.checksum) => {}
                    Ok(_) => {
                        println!("CORRUPTED: {} ({})", path.display(), entry.identifier);
                        corrupted += 1;
                        continue;
                    }
                    Err(e) => {
                        println!("ERROR: {} - {}", path.display(), e);
                        corrupted += 1;
                        continue;
                    }
                }
            }
            verified += 1;
        }
    }

    println!();
    println!("Results:");
    println!("  Verified:  {}", verified);
    println!("  Missing:   {}", missing);
    println!("  Corrupted: {}", corrupted);

    if missing > 0 || corrupted > 0 {
        anyhow::bail!("{} missing and {} corrupted file(s)", missing, corrupted);
    }
    Ok(())
}

async fn run_reset_state(state_dir: &Path, args: cli::ResetStateArgs) -> anyhow::Result<()> {
    let db_path = state_dir.join(index::INDEX_FILE);
    if !db_path.exists() {
        println!("No index found at {}", db_path.display());
        return Ok(());
    }
    // Refuse while a sync holds the index.
    let _lock = IndexLock::acquire(state_dir).await?;

    if !args.yes {
        println!("This will delete the index at:");
        println!("  {}", db_path.display());
        println!("Every item will be downloaded again on the next sync.");
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    std::fs::remove_file(&db_path)?;
    for sidecar in index::sidecar_paths(&db_path) {
        let _ = std::fs::remove_file(sidecar);
    }
    println!("Index deleted.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let state_dir = config::expand_tilde(&cli.state_dir);
    match cli.command {
        Command::Sync(args) => run_sync(config::Config::from_cli(&cli.state_dir, args)?).await,
        Command::Albums { action } => run_albums(&state_dir, action).await,
        Command::Status(args) => run_status(&state_dir, args).await,
        Command::Verify(args) => run_verify(&state_dir, args).await,
        Command::ResetState(args) => run_reset_state(&state_dir, args).await,
    }
}
