//! Batch uploader. Walks the manifest in windows, sends each unit to its
//! endpoint with retries and writes the outcome to the tracker store.
//!
//! Foreground units run strictly in manifest order. Oversize videos are
//! spawned as background tasks right after the unit that precedes them;
//! [`BatchUploader::join_background`] must be awaited before the final
//! statistics are read.

pub mod plan;

use std::io::IsTerminal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;

pub use plan::{plan_batches, BatchPlan, PlanConfig, SendUnit};

use crate::manifest::ManifestEntry;
use crate::notify::{self, Notifier, Progress};
use crate::resources::BackgroundThrottle;
use crate::retry::{self, RetryAction, RetryConfig};
use crate::telegram::{ApiError, MediaBackend};
use crate::tracker::{TrackerError, TrackerStore};

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub chat_id: String,
    /// Label used in progress notifications.
    pub album: String,
    pub plan: PlanConfig,
    pub retry: RetryConfig,
    pub throttle: BackgroundThrottle,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

/// Totals for one run, including background sends once joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub groups: usize,
    pub singles: usize,
    pub background: usize,
}

impl UploadStats {
    pub fn pending(&self) -> usize {
        self.total.saturating_sub(self.sent + self.failed)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            sent: self.sent,
            failed: self.failed,
            pending: self.pending(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicUsize,
    failed: AtomicUsize,
    groups: AtomicUsize,
    singles: AtomicUsize,
}

type BackgroundJob = JoinHandle<Result<(), TrackerError>>;

pub struct BatchUploader {
    backend: Arc<dyn MediaBackend>,
    store: Arc<TrackerStore>,
    notifier: Arc<dyn Notifier>,
    config: UploadConfig,
    counters: Arc<Counters>,
    total: usize,
    spawned: usize,
    background: Vec<BackgroundJob>,
}

impl BatchUploader {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        store: Arc<TrackerStore>,
        notifier: Arc<dyn Notifier>,
        config: UploadConfig,
    ) -> Self {
        Self {
            backend,
            store,
            notifier,
            config,
            counters: Arc::new(Counters::default()),
            total: 0,
            spawned: 0,
            background: Vec::new(),
        }
    }

    pub fn stats(&self) -> UploadStats {
        UploadStats {
            total: self.total,
            sent: self.counters.sent.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            groups: self.counters.groups.load(Ordering::SeqCst),
            singles: self.counters.singles.load(Ordering::SeqCst),
            background: self.spawned,
        }
    }

    /// Send every entry of `entries`, batch by batch.
    ///
    /// Backend failures are recorded per item and never abort the run; only a
    /// ledger write failure does.
    pub async fn upload(&mut self, entries: &[ManifestEntry]) -> Result<(), TrackerError> {
        let batches = plan_batches(entries, &self.config.plan);
        self.total += entries.len();

        if self.config.dry_run {
            for batch in &batches {
                log_plan(batch, batches.len());
            }
            return Ok(());
        }

        tracing::info!(
            items = entries.len(),
            batches = batches.len(),
            "Uploading to chat {}",
            self.config.chat_id
        );
        let pb = create_progress_bar(self.config.no_progress_bar, entries.len() as u64);

        for batch in &batches {
            for unit in &batch.units {
                if unit.background {
                    self.config.throttle.wait_for_slot(&self.background).await;
                    pb.suspend(|| {
                        tracing::info!(
                            "Batch {}: sending {} in the background via {}",
                            batch.number,
                            describe(unit),
                            unit.endpoint
                        );
                    });
                    let job = self.spawn_background(unit.clone(), pb.clone());
                    self.background.push(job);
                    self.spawned += 1;
                    continue;
                }

                let ok = deliver(
                    self.backend.as_ref(),
                    &self.store,
                    &self.counters,
                    &self.config,
                    unit,
                    &pb,
                )
                .await?;
                if !ok {
                    pb.suspend(|| {
                        tracing::error!(
                            "Batch {}: {} item(s) failed via {}",
                            batch.number,
                            unit.entries.len(),
                            unit.endpoint
                        );
                    });
                }
            }

            let text = notify::batch_message(
                &self.config.album,
                batch.number,
                batches.len(),
                self.stats().progress(),
            );
            notify::notify(self.notifier.as_ref(), &text).await;
        }

        pb.finish_and_clear();
        Ok(())
    }

    fn spawn_background(&self, unit: SendUnit, pb: ProgressBar) -> BackgroundJob {
        let backend = Arc::clone(&self.backend);
        let store = Arc::clone(&self.store);
        let counters = Arc::clone(&self.counters);
        let config = self.config.clone();
        tokio::spawn(async move {
            deliver(backend.as_ref(), &store, &counters, &config, &unit, &pb)
                .await
                .map(|_| ())
        })
    }

    /// Wait for every background send. A ledger failure in any of them is
    /// returned after all have finished.
    pub async fn join_background(&mut self) -> Result<(), TrackerError> {
        if self.background.is_empty() {
            return Ok(());
        }
        let outstanding = self.background.iter().filter(|h| !h.is_finished()).count();
        if outstanding > 0 {
            tracing::info!(outstanding, "Waiting for background uploads");
        }
        let mut first_error = None;
        for handle in std::mem::take(&mut self.background) {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("Background upload could not update the tracker: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) => tracing::error!("Background upload task panicked: {}", e),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Send one unit with retries and record the outcome for every item in it.
/// Returns whether the send succeeded.
async fn deliver(
    backend: &dyn MediaBackend,
    store: &TrackerStore,
    counters: &Counters,
    config: &UploadConfig,
    unit: &SendUnit,
    pb: &ProgressBar,
) -> Result<bool, TrackerError> {
    if unit.is_group() {
        counters.groups.fetch_add(1, Ordering::SeqCst);
    } else {
        counters.singles.fetch_add(1, Ordering::SeqCst);
    }

    let result = send_unit(backend, &config.chat_id, unit, &config.retry).await;
    let ok = result.is_ok();
    if let Err(e) = &result {
        pb.suspend(|| {
            tracing::error!(
                "Upload failed after retries ({} via {}): {}",
                describe(unit),
                unit.endpoint,
                e
            );
        });
    }

    for entry in &unit.entries {
        if ok {
            store.record_sent(&entry.source)?;
            counters.sent.fetch_add(1, Ordering::SeqCst);
        } else {
            store.record_failed(&entry.source)?;
            counters.failed.fetch_add(1, Ordering::SeqCst);
        }
        pb.inc(1);
    }
    Ok(ok)
}

async fn send_unit(
    backend: &dyn MediaBackend,
    chat_id: &str,
    unit: &SendUnit,
    retry_config: &RetryConfig,
) -> Result<(), ApiError> {
    let uploads = unit.uploads();
    let endpoint = unit.endpoint;
    retry::retry_with_backoff(
        retry_config,
        |e: &ApiError| {
            if e.is_retryable() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || async {
            match uploads.as_slice() {
                [single] => backend.send_single(endpoint, chat_id, single).await,
                many => backend.send_group(endpoint, chat_id, many).await,
            }
        },
    )
    .await
}

fn describe(unit: &SendUnit) -> String {
    match unit.entries.as_slice() {
        [single] => single.source.display().to_string(),
        many => format!("group of {}", many.len()),
    }
}

fn log_plan(batch: &BatchPlan, batches: usize) {
    tracing::info!(
        "[DRY RUN] Batch {}/{}: {} item(s)",
        batch.number,
        batches,
        batch.item_count()
    );
    for unit in &batch.units {
        let kind = if unit.is_group() { "group" } else { "single" };
        tracing::info!(
            "[DRY RUN]   {} of {} item(s), {} bytes, via {}{}",
            kind,
            unit.entries.len(),
            unit.payload(),
            unit.endpoint,
            if unit.background { " (background)" } else { "" }
        );
        for entry in &unit.entries {
            tracing::debug!("[DRY RUN]     {}", entry.upload.display());
        }
    }
}

/// Returns `ProgressBar::hidden()` when disabled or stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb
}
