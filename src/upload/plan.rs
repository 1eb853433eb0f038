//! Batch formation and endpoint routing. Pure; no I/O.

use crate::manifest::ManifestEntry;
use crate::media::MediaKind;
use crate::telegram::{Endpoint, MediaUpload};
use crate::types::GroupRouting;

/// Backend limit for one media group.
pub const MAX_GROUP_SIZE: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct PlanConfig {
    pub batch_size: usize,
    /// Bytes. Payloads above this go through the proxy.
    pub large_file_threshold: u64,
    pub routing: GroupRouting,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_GROUP_SIZE,
            large_file_threshold: 50 * 1024 * 1024,
            routing: GroupRouting::Size,
        }
    }
}

/// One backend request: a media group or a single item.
#[derive(Debug, Clone)]
pub struct SendUnit {
    pub endpoint: Endpoint,
    pub entries: Vec<ManifestEntry>,
    /// Oversize video sent as a background task.
    pub background: bool,
}

impl SendUnit {
    pub fn is_group(&self) -> bool {
        self.entries.len() >= 2
    }

    pub fn payload(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    pub fn uploads(&self) -> Vec<MediaUpload> {
        self.entries
            .iter()
            .map(|e| MediaUpload {
                path: e.upload.clone(),
                kind: e.kind,
                size: e.size,
            })
            .collect()
    }
}

/// One manifest window: the group (or single) first, then oversize videos
/// in manifest order.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    /// 1-based.
    pub number: usize,
    pub units: Vec<SendUnit>,
}

impl BatchPlan {
    pub fn item_count(&self) -> usize {
        self.units.iter().map(|u| u.entries.len()).sum()
    }
}

fn is_oversize_video(entry: &ManifestEntry, threshold: u64) -> bool {
    entry.kind == MediaKind::Video && entry.size > threshold
}

pub fn plan_batches(entries: &[ManifestEntry], config: &PlanConfig) -> Vec<BatchPlan> {
    let batch_size = config.batch_size.clamp(1, MAX_GROUP_SIZE);
    entries
        .chunks(batch_size)
        .enumerate()
        .map(|(i, chunk)| BatchPlan {
            number: i + 1,
            units: plan_batch(chunk, config),
        })
        .collect()
}

fn plan_batch(chunk: &[ManifestEntry], config: &PlanConfig) -> Vec<SendUnit> {
    let threshold = config.large_file_threshold;
    let (oversize, eligible): (Vec<_>, Vec<_>) = chunk
        .iter()
        .cloned()
        .partition(|e| is_oversize_video(e, threshold));

    let mut units = Vec::with_capacity(1 + oversize.len());
    if !eligible.is_empty() {
        let mut unit = SendUnit {
            endpoint: Endpoint::Cloud,
            entries: eligible,
            background: false,
        };
        unit.endpoint = route(&unit, config);
        units.push(unit);
    }
    units.extend(oversize.into_iter().map(|entry| SendUnit {
        endpoint: Endpoint::Proxy,
        entries: vec![entry],
        background: true,
    }));
    units
}

/// Endpoint for a foreground unit.
pub fn route(unit: &SendUnit, config: &PlanConfig) -> Endpoint {
    if unit.is_group() && config.routing == GroupRouting::Proxy {
        return Endpoint::Proxy;
    }
    if unit.payload() > config.large_file_threshold {
        Endpoint::Proxy
    } else {
        Endpoint::Cloud
    }
}
