//! album-courier: uploads a photo album to a Telegram chat.
//!
//! HEIC originals are converted to JPEG first, then every item is sent in
//! capture order as media groups. Per-album ledgers record what was sent,
//! so an interrupted run resumes where it stopped and a finished album is
//! never sent twice.

#![warn(clippy::all)]

mod cli;
mod config;
mod convert;
mod library;
mod logging;
mod manifest;
mod media;
mod notify;
mod resources;
pub mod retry;
mod sync;
mod telegram;
#[cfg(test)]
mod test_support;
mod tracker;
mod types;
mod upload;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use cli::Command;
use config::AlbumTarget;
use library::{DirectoryLibrary, MediaLibrary};
use tracker::{AlbumPaths, TrackerStore};

/// Resolve the album and open its tracker store for the selected mode.
async fn open_store(target: &AlbumTarget) -> anyhow::Result<TrackerStore> {
    let library = DirectoryLibrary::new(target.library_root.clone());
    let album_dir = library.album_dir(&target.album).await?;
    sync::open_store(AlbumPaths::new(&target.state_dir, &album_dir, target.mode)).await
}

/// Run the status command.
async fn run_status(args: cli::StatusArgs, target: AlbumTarget) -> anyhow::Result<()> {
    let store = open_store(&target).await?;
    let paths = store.paths();
    let summary = store.summary();
    let manifest = manifest::read_manifest(&paths.manifest_file())?;

    println!("Album:  {}", paths.album_dir.display());
    println!("Mode:   {}", target.mode);
    println!("State:  {}", paths.mode_dir.display());
    println!();
    println!("Ledgers:");
    println!("  Sent:      {}", summary.sent);
    println!("  Failed:    {}", summary.failed);
    println!("  Converted: {}", summary.converted);
    println!("Last manifest: {} item(s)", manifest.len());

    if args.failed && summary.failed > 0 {
        println!();
        println!("Failed items:");
        for path in store.failed_paths() {
            println!("  {}", path.display());
        }
    }
    Ok(())
}

/// Run the reset command.
async fn run_reset(args: cli::ResetArgs, target: AlbumTarget) -> anyhow::Result<()> {
    let store = open_store(&target).await?;

    if !args.yes {
        println!(
            "This will clear {:?} state ({}) for:",
            args.scope, target.mode
        );
        println!("  {}", store.paths().album_dir.display());
        println!();
        print!("Are you sure? [y/N] ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store.reset(args.scope)?;
    println!("State cleared.");
    Ok(())
}

/// Run the repair command.
async fn run_repair(target: AlbumTarget) -> anyhow::Result<()> {
    let store = open_store(&target).await?;
    let repaired = store.repair()?;
    if repaired.is_empty() {
        println!("Nothing to repair.");
        return Ok(());
    }
    println!(
        "Dropped {} stale conversion record(s); they will be converted again:",
        repaired.len()
    );
    for path in repaired {
        println!("  {}", path.display());
    }
    Ok(())
}

async fn run(config: config::Config) -> anyhow::Result<()> {
    let timeouts = telegram::ClientTimeouts::default();
    let backend: Arc<dyn telegram::MediaBackend> = Arc::new(telegram::TelegramClient::new(
        &config.cloud_api_url,
        &config.proxy_api_url,
        &config.bot_token,
        timeouts,
    )?);
    let notify_backend: Arc<dyn telegram::MediaBackend> =
        if config.notify_token == config.bot_token {
            Arc::clone(&backend)
        } else {
            Arc::new(telegram::TelegramClient::new(
                &config.cloud_api_url,
                &config.proxy_api_url,
                &config.notify_token,
                timeouts,
            )?)
        };

    let services = sync::Services {
        library: Arc::new(DirectoryLibrary::new(config.target.library_root.clone())),
        converter: Arc::new(convert::MagickConverter::new(config.converter.clone())),
        backend,
        notifier: Arc::new(notify::BotNotifier::new(
            notify_backend,
            config.chat_id.clone(),
        )),
    };

    let report = sync::run_sync(&config, &services).await?;
    let progress = report.progress();
    if progress.failed > 0 && !config.dry_run {
        anyhow::bail!(
            "{} item(s) failed; run again with --retry-failed",
            progress.failed
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let _log_guard = logging::init(cli.log_level, cli.error_log.as_deref().map(Path::new))?;

    let state_dir = cli.state_dir.as_str();
    let library_root = cli.library_root.as_deref();
    match cli.command {
        Command::Status(args) => {
            let target = AlbumTarget::from_cli(&args.album, state_dir, library_root);
            run_status(args, target).await
        }
        Command::Reset(args) => {
            let target = AlbumTarget::from_cli(&args.album, state_dir, library_root);
            run_reset(args, target).await
        }
        Command::Repair(args) => {
            run_repair(AlbumTarget::from_cli(&args, state_dir, library_root)).await
        }
        Command::Sync(args) => {
            let config = config::Config::from_cli(args, state_dir, library_root)?;
            tracing::debug!(?config, "Starting album-courier");
            run(config).await
        }
    }
}
