//! Run controller. Drives one album through conversion, manifest building
//! and upload, in that order, against a locked tracker store.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::config::Config;
use crate::convert::{self, ConversionConfig, ConversionReport, ImageConverter};
use crate::library::MediaLibrary;
use crate::manifest::{self, ManifestOptions};
use crate::media::{self, SourceItem};
use crate::notify::{self, Notifier, Progress};
use crate::resources::BackgroundThrottle;
use crate::retry::{self, RetryAction};
use crate::telegram::{ApiError, Endpoint, MediaBackend};
use crate::tracker::{AlbumPaths, TrackerStore};
use crate::types::ResetScope;
use crate::upload::{BatchUploader, PlanConfig, UploadConfig, UploadStats};

/// External collaborators of a sync run.
#[derive(Clone)]
pub struct Services {
    pub library: Arc<dyn MediaLibrary>,
    pub converter: Arc<dyn ImageConverter>,
    pub backend: Arc<dyn MediaBackend>,
    pub notifier: Arc<dyn Notifier>,
}

/// What happened to every file of the album in this run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub album: String,
    pub scanned: usize,
    pub unsupported: usize,
    pub unreadable: usize,
    pub already_sent: usize,
    pub conversion: ConversionReport,
    pub awaiting_conversion: usize,
    pub missing_artifacts: usize,
    pub manifest_len: usize,
    pub upload: UploadStats,
    pub cleaned: usize,
}

impl SyncReport {
    /// Counts for the final notification. Conversion and scan failures count
    /// as failed.
    pub fn progress(&self) -> Progress {
        Progress {
            sent: self.upload.sent,
            failed: self.upload.failed
                + self.conversion.failed
                + self.missing_artifacts
                + self.unreadable,
            // Failed conversions are still awaiting conversion.
            pending: self.upload.pending()
                + self
                    .awaiting_conversion
                    .saturating_sub(self.conversion.failed),
        }
    }
}

/// Run one sync. On a fatal error a short notification is still attempted
/// before the error is returned.
pub async fn run_sync(config: &Config, services: &Services) -> anyhow::Result<SyncReport> {
    let mut report = SyncReport {
        album: config.target.album.clone(),
        ..Default::default()
    };
    match sync_album(config, services, &mut report).await {
        Ok(()) => Ok(report),
        Err(e) => {
            if !config.dry_run {
                let text = notify::aborted_message(&report.album, config.target.mode);
                notify::notify(services.notifier.as_ref(), &text).await;
            }
            Err(e)
        }
    }
}

async fn sync_album(
    config: &Config,
    services: &Services,
    report: &mut SyncReport,
) -> anyhow::Result<()> {
    let mode = config.target.mode;
    let dry_run = config.dry_run;

    let album_dir = services.library.album_dir(&config.target.album).await?;
    report.album = album_label(&album_dir);
    let paths = AlbumPaths::new(&config.target.state_dir, &album_dir, mode);
    let store = Arc::new(open_store(paths).await?);
    tracing::info!(
        album = %report.album,
        %mode,
        dry_run,
        "Syncing {}",
        album_dir.display()
    );

    let entries = services.library.list_album(&config.target.album).await?;
    let scan = media::scan_entries(&entries);
    report.scanned = scan.items.len();
    report.unsupported = scan.unsupported.len();
    report.unreadable = scan.unreadable.len();

    if conversion_work_expected(&scan.items, &store, config.reset) && !dry_run {
        services
            .converter
            .check()
            .await
            .context("Image converter is not usable")?;
    }

    if config.reset != ResetScope::None {
        if dry_run {
            tracing::info!("[DRY RUN] Would reset {:?} state", config.reset);
        } else {
            let scope = config.reset;
            let store = Arc::clone(&store);
            tokio::task::spawn_blocking(move || store.reset(scope)).await??;
        }
    }

    if !dry_run {
        preflight(services.backend.as_ref(), config).await?;
        for path in &scan.unreadable {
            store.record_failed(path)?;
        }
    }

    report.conversion = convert::convert_album(
        &scan.items,
        &store,
        services.converter.as_ref(),
        &ConversionConfig {
            parallelism: config.parallelism,
            dry_run,
            ..Default::default()
        },
    )
    .await?;

    // Reads capture times from every file; kept off the async workers.
    let options = ManifestOptions {
        retry_only: config.retry_failed,
        dry_run,
    };
    let build = {
        let items = scan.items;
        let store = Arc::clone(&store);
        tokio::task::spawn_blocking(move || manifest::build_manifest(&items, &store, options))
            .await??
    };
    report.already_sent = build.already_sent;
    report.awaiting_conversion = build.awaiting_conversion.len();
    report.missing_artifacts = build.missing_artifact.len();
    report.manifest_len = build.entries.len();
    if !dry_run {
        manifest::write_manifest(&store.paths().manifest_file(), &build.entries)?;
    }
    tracing::info!(
        entries = build.entries.len(),
        already_sent = build.already_sent,
        awaiting_conversion = build.awaiting_conversion.len(),
        "Manifest built"
    );

    if build.entries.is_empty() {
        tracing::info!("Nothing to upload");
        if !dry_run {
            let text = notify::nothing_to_send(&report.album, mode);
            notify::notify(services.notifier.as_ref(), &text).await;
            report.cleaned = cleanup(&store).await?;
        }
        return Ok(());
    }

    let mut uploader = BatchUploader::new(
        Arc::clone(&services.backend),
        Arc::clone(&store),
        Arc::clone(&services.notifier),
        UploadConfig {
            chat_id: config.chat_id.clone(),
            album: report.album.clone(),
            plan: PlanConfig {
                batch_size: config.batch_size,
                large_file_threshold: config.large_file_threshold,
                routing: config.group_routing,
            },
            retry: config.retry,
            throttle: BackgroundThrottle::new(config.max_background, config.min_free_memory_mb),
            dry_run,
            no_progress_bar: config.no_progress_bar,
        },
    );
    let uploaded = uploader.upload(&build.entries).await;
    // Background sends are joined even when the foreground loop failed.
    let joined = uploader.join_background().await;
    report.upload = uploader.stats();
    uploaded?;
    joined?;

    if dry_run {
        tracing::info!(
            "[DRY RUN] Would upload {} item(s) in {} batch(es)",
            build.entries.len(),
            build.entries.len().div_ceil(config.batch_size.max(1))
        );
        return Ok(());
    }

    let text = notify::final_message(&report.album, mode, report.progress(), report.unsupported);
    notify::notify(services.notifier.as_ref(), &text).await;

    report.cleaned = cleanup(&store).await?;
    tracing::info!(
        sent = report.upload.sent,
        failed = report.progress().failed,
        pending = report.progress().pending,
        cleaned = report.cleaned,
        "Sync finished"
    );
    Ok(())
}

/// Lock and load the tracker store on the blocking pool.
pub(crate) async fn open_store(paths: AlbumPaths) -> anyhow::Result<TrackerStore> {
    let album_dir = paths.album_dir.clone();
    tokio::task::spawn_blocking(move || TrackerStore::open(paths))
        .await?
        .with_context(|| format!("Opening tracker state for {}", album_dir.display()))
}

async fn cleanup(store: &Arc<TrackerStore>) -> anyhow::Result<usize> {
    let store = Arc::clone(store);
    Ok(tokio::task::spawn_blocking(move || store.cleanup_scratch()).await??)
}

/// Whether the conversion stage will have anything to do once `reset` is
/// applied. Decides if the converter must be present.
fn conversion_work_expected(items: &[SourceItem], store: &TrackerStore, reset: ResetScope) -> bool {
    items.iter().filter(|i| i.needs_conversion()).any(|i| {
        let converted = reset != ResetScope::All && store.is_converted(&i.path);
        let sent = reset == ResetScope::None && store.is_sent(&i.path);
        !converted && !sent
    })
}

/// `getMe` against the proxy. A proxy that is down would fail every large
/// upload, so the run stops here instead.
async fn preflight(backend: &dyn MediaBackend, config: &Config) -> anyhow::Result<()> {
    let identity = retry::retry_with_backoff(
        &config.retry,
        |e: &ApiError| {
            if e.is_retryable() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || backend.get_me(Endpoint::Proxy),
    )
    .await
    .with_context(|| format!("Proxy endpoint {} is not healthy", config.proxy_api_url))?;
    tracing::info!(
        bot = identity.as_deref().unwrap_or("unknown"),
        "Proxy endpoint healthy"
    );
    Ok(())
}

fn album_label(album_dir: &Path) -> String {
    album_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| album_dir.display().to_string())
}
