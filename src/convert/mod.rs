//! Conversion stage. Normalizes HEIC sources into JPEG artifacts in the
//! album's scratch directory before the manifest is built.
//!
//! Workers run concurrently over the pending list and each returns its own
//! [`ConversionRecord`]; ledger updates are applied serially afterwards, so
//! no two workers ever write the tracker at the same time.

pub mod converter;
pub mod error;

use std::path::{Path, PathBuf};

use futures_util::stream::{self, StreamExt};

pub use converter::{ImageConverter, MagickConverter, JPEG_QUALITY, MAX_DIMENSION};
pub use error::ConvertError;

use crate::media::SourceItem;
use crate::tracker::{TrackerError, TrackerStore};

#[derive(Debug, Clone)]
pub struct ConversionConfig {
    pub max_dimension: u32,
    pub quality: u8,
    pub parallelism: usize,
    pub dry_run: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_dimension: MAX_DIMENSION,
            quality: JPEG_QUALITY,
            parallelism: 3,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStatus {
    Pending,
    Success,
    Failed,
}

/// Outcome of converting one source.
#[derive(Debug, Clone)]
pub struct ConversionRecord {
    pub source: PathBuf,
    pub artifact: PathBuf,
    pub status: ConversionStatus,
    pub reason: Option<String>,
    /// The artifact was already present (e.g. produced by a run in the
    /// other mode) and the converter was not invoked.
    pub adopted: bool,
}

impl ConversionRecord {
    fn pending(source: &Path, artifact: PathBuf) -> Self {
        Self {
            source: source.to_path_buf(),
            artifact,
            status: ConversionStatus::Pending,
            reason: None,
            adopted: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConversionReport {
    pub converted: usize,
    pub adopted: usize,
    pub failed: usize,
    /// Sources skipped because the ledgers say they are done.
    pub skipped: usize,
    pub records: Vec<ConversionRecord>,
}

/// Sources that still need a conversion attempt.
pub fn pending_conversions<'a>(items: &'a [SourceItem], store: &TrackerStore) -> Vec<&'a SourceItem> {
    items
        .iter()
        .filter(|i| i.needs_conversion())
        .filter(|i| !store.is_converted(&i.path) && !store.is_sent(&i.path))
        .collect()
}

/// Convert every pending HEIC source in `items`.
pub async fn convert_album(
    items: &[SourceItem],
    store: &TrackerStore,
    converter: &dyn ImageConverter,
    config: &ConversionConfig,
) -> Result<ConversionReport, TrackerError> {
    let work = pending_conversions(items, store);
    let mut report = ConversionReport {
        skipped: items.iter().filter(|i| i.needs_conversion()).count() - work.len(),
        ..Default::default()
    };

    if work.is_empty() {
        tracing::debug!(skipped = report.skipped, "No conversions needed");
        return Ok(report);
    }

    if config.dry_run {
        for item in &work {
            tracing::info!("[DRY RUN] Would convert {}", item.path.display());
        }
        return Ok(report);
    }

    let scratch = &store.paths().scratch_dir;
    tokio::fs::create_dir_all(scratch)
        .await
        .map_err(|e| TrackerError::io(scratch, e))?;

    tracing::info!(
        count = work.len(),
        parallelism = config.parallelism,
        "Converting HEIC sources"
    );

    let records: Vec<ConversionRecord> = stream::iter(work)
        .map(|item| {
            let record = ConversionRecord::pending(&item.path, store.artifact_path(&item.path));
            convert_one(record, converter, config)
        })
        .buffer_unordered(config.parallelism.max(1))
        .collect()
        .await;

    for record in &records {
        match record.status {
            ConversionStatus::Success => {
                store.record_converted(&record.source)?;
                if record.adopted {
                    report.adopted += 1;
                } else {
                    report.converted += 1;
                }
            }
            ConversionStatus::Failed | ConversionStatus::Pending => {
                tracing::error!(
                    "Conversion failed: {}: {}",
                    record.source.display(),
                    record.reason.as_deref().unwrap_or("unknown error")
                );
                store.record_failed(&record.source)?;
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        converted = report.converted,
        adopted = report.adopted,
        failed = report.failed,
        "Conversion stage finished"
    );
    report.records = records;
    Ok(report)
}

/// Convert a single source, writing to a `.part.jpg` sibling first so a
/// killed run never leaves a truncated artifact under the final name.
async fn convert_one(
    mut record: ConversionRecord,
    converter: &dyn ImageConverter,
    config: &ConversionConfig,
) -> ConversionRecord {
    if artifact_is_present(&record.artifact).await {
        tracing::debug!("Adopting existing artifact {}", record.artifact.display());
        record.status = ConversionStatus::Success;
        record.adopted = true;
        return record;
    }

    let part = record.artifact.with_extension("part.jpg");
    let result = async {
        converter
            .convert(&record.source, &part, config.max_dimension, config.quality)
            .await?;
        if !artifact_is_present(&part).await {
            return Err(ConvertError::EmptyOutput(record.source.clone()));
        }
        tokio::fs::rename(&part, &record.artifact).await?;
        Ok::<(), ConvertError>(())
    }
    .await;

    match result {
        Ok(()) => {
            tracing::debug!("Converted {}", record.source.display());
            record.status = ConversionStatus::Success;
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            record.status = ConversionStatus::Failed;
            record.reason = Some(e.to_string());
        }
    }
    record
}

async fn artifact_is_present(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
