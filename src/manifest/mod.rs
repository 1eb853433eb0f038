//! Manifest builder. Resolves every album item to its upload path, orders
//! the result chronologically and persists it as this run's processing order.

pub mod timestamp;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::media::{MediaKind, SourceItem};
use crate::tracker::{TrackerError, TrackerStore};

/// One upload task, in manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Unix seconds.
    pub timestamp: i64,
    pub source: PathBuf,
    pub upload: PathBuf,
    pub kind: MediaKind,
    /// Size of `upload` in bytes. Not persisted.
    pub size: u64,
}

impl ManifestEntry {
    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.timestamp,
            self.source.display(),
            self.upload.display(),
            self.kind
        )
    }

    pub fn parse_line(line: &str) -> Result<Self, ManifestError> {
        let bad = || ManifestError::Malformed(line.to_string());
        let (timestamp, rest) = line.split_once('|').ok_or_else(bad)?;
        let (paths, kind) = rest.rsplit_once('|').ok_or_else(bad)?;
        // Exactly one separator between the two paths.
        if paths.matches('|').count() != 1 {
            return Err(bad());
        }
        let (source, upload) = paths.split_once('|').ok_or_else(bad)?;
        let upload = PathBuf::from(upload);
        let size = std::fs::metadata(&upload).map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            timestamp: timestamp.parse().map_err(|_| bad())?,
            source: PathBuf::from(source),
            upload,
            kind: MediaKind::parse(kind).ok_or_else(bad)?,
            size,
        })
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Malformed manifest line: {0:?}")]
    Malformed(String),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestOptions {
    /// Only include items currently recorded as failed.
    pub retry_only: bool,
    /// Build the manifest without writing to any ledger.
    pub dry_run: bool,
}

/// Manifest plus what was left out of it, and why.
#[derive(Debug, Default)]
pub struct ManifestBuild {
    pub entries: Vec<ManifestEntry>,
    pub already_sent: usize,
    /// HEIC sources without a successful conversion yet.
    pub awaiting_conversion: Vec<PathBuf>,
    /// Sources recorded as converted whose artifact no longer exists.
    pub missing_artifact: Vec<PathBuf>,
    /// Excluded by retry-only mode.
    pub not_failed: usize,
}

/// Build the chronologically ordered manifest for `items`.
///
/// Ordering is by capture timestamp ascending; the sort is stable, so items
/// with equal timestamps keep discovery order.
pub fn build_manifest(
    items: &[SourceItem],
    store: &TrackerStore,
    options: ManifestOptions,
) -> Result<ManifestBuild, TrackerError> {
    let mut build = ManifestBuild::default();

    for item in items {
        if store.is_sent(&item.path) {
            build.already_sent += 1;
            continue;
        }
        if options.retry_only && !store.is_failed(&item.path) {
            build.not_failed += 1;
            continue;
        }

        let (upload, size) = if item.needs_conversion() {
            if !store.is_converted(&item.path) {
                build.awaiting_conversion.push(item.path.clone());
                continue;
            }
            let artifact = store.artifact_path(&item.path);
            match std::fs::metadata(&artifact) {
                Ok(m) if m.is_file() => (artifact, m.len()),
                _ => {
                    tracing::error!(
                        "Converted artifact missing for {} (expected {}); run `repair` to reconvert",
                        item.path.display(),
                        artifact.display()
                    );
                    if !options.dry_run {
                        store.record_failed(&item.path)?;
                    }
                    build.missing_artifact.push(item.path.clone());
                    continue;
                }
            }
        } else {
            (item.path.clone(), item.size)
        };

        // Capture time lives in the source; converted artifacts are stripped.
        let (ts, origin) = timestamp::sort_timestamp(&item.path, item.kind);
        tracing::trace!(path = %item.path.display(), ts, ?origin, "sort key");

        build.entries.push(ManifestEntry {
            timestamp: ts,
            source: item.path.clone(),
            upload,
            kind: item.kind,
            size,
        });
    }

    build.entries.sort_by_key(|e| e.timestamp);
    Ok(build)
}

/// Persist `entries` via write-then-rename.
pub fn write_manifest(path: &Path, entries: &[ManifestEntry]) -> Result<(), TrackerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TrackerError::io(parent, e))?;
    }
    let mut content = String::new();
    for entry in entries {
        content.push_str(&entry.to_line());
        content.push('\n');
    }
    let tmp = path.with_extension("txt.tmp");
    std::fs::write(&tmp, content).map_err(|e| TrackerError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| TrackerError::io(path, e))?;
    Ok(())
}

/// Load a persisted manifest. A missing file is an empty manifest.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>, ManifestError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(TrackerError::io(path, e).into()),
    };
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(ManifestEntry::parse_line)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{list_directory, scan_entries};
    use crate::test_support::{set_mtime, StateFixture};

    fn items(fx: &StateFixture) -> Vec<SourceItem> {
        scan_entries(&list_directory(&fx.album).unwrap()).items
    }

    #[test]
    fn test_orders_by_timestamp_not_discovery() {
        let fx = StateFixture::new();
        // Discovery order is a, b, c; capture order is c, a, b.
        fx.write("a.jpg", b"a");
        fx.write("b.mp4", b"b");
        fx.write("c.png", b"c");
        set_mtime(&fx.album.join("a.jpg"), 2_000);
        set_mtime(&fx.album.join("b.mp4"), 3_000);
        set_mtime(&fx.album.join("c.png"), 1_000);
        let store = fx.open_store();

        let build = build_manifest(&items(&fx), &store, ManifestOptions::default()).unwrap();
        let names: Vec<_> = build
            .entries
            .iter()
            .map(|e| e.source.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["c.png", "a.jpg", "b.mp4"]);
        assert_eq!(build.entries[2].kind, MediaKind::Video);
    }

    #[test]
    fn test_ties_keep_discovery_order() {
        let fx = StateFixture::new();
        for name in ["x1.jpg", "x2.jpg", "x3.jpg"] {
            fx.write(name, b"x");
            set_mtime(&fx.album.join(name), 5_000);
        }
        let store = fx.open_store();
        let build = build_manifest(&items(&fx), &store, ManifestOptions::default()).unwrap();
        let names: Vec<_> = build
            .entries
            .iter()
            .map(|e| e.source.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["x1.jpg", "x2.jpg", "x3.jpg"]);
    }

    #[test]
    fn test_heic_resolution() {
        let fx = StateFixture::new();
        fx.write("done.HEIC", b"h");
        fx.write("waiting.HEIC", b"h");
        fx.write("lost.HEIC", b"h");
        let store = fx.open_store();
        let done = fx.album.join("done.HEIC");
        let lost = fx.album.join("lost.HEIC");
        store.record_converted(&done).unwrap();
        store.record_converted(&lost).unwrap();
        std::fs::create_dir_all(&store.paths().scratch_dir).unwrap();
        std::fs::write(store.artifact_path(&done), b"jpeg!").unwrap();

        let build = build_manifest(&items(&fx), &store, ManifestOptions::default()).unwrap();

        assert_eq!(build.entries.len(), 1);
        assert_eq!(build.entries[0].source, done);
        assert_eq!(build.entries[0].upload, store.artifact_path(&done));
        assert_eq!(build.entries[0].size, 5);
        assert_eq!(build.awaiting_conversion, vec![fx.album.join("waiting.HEIC")]);
        assert_eq!(build.missing_artifact, vec![lost.clone()]);
        assert!(store.is_failed(&lost));
    }

    #[test]
    fn test_skips_sent_and_honours_retry_only() {
        let fx = StateFixture::new();
        fx.write("a.jpg", b"a");
        fx.write("b.jpg", b"b");
        fx.write("c.jpg", b"c");
        let store = fx.open_store();
        store.record_sent(&fx.album.join("a.jpg")).unwrap();
        store.record_failed(&fx.album.join("b.jpg")).unwrap();

        let all = build_manifest(&items(&fx), &store, ManifestOptions::default()).unwrap();
        assert_eq!(all.entries.len(), 2);
        assert_eq!(all.already_sent, 1);

        let retry = build_manifest(
            &items(&fx),
            &store,
            ManifestOptions {
                retry_only: true,
                dry_run: false,
            },
        )
        .unwrap();
        assert_eq!(retry.entries.len(), 1);
        assert_eq!(retry.entries[0].source, fx.album.join("b.jpg"));
        assert_eq!(retry.not_failed, 1);
    }

    #[test]
    fn test_write_and_read_manifest() {
        let fx = StateFixture::new();
        fx.write("a.jpg", b"abc");
        let store = fx.open_store();
        let build = build_manifest(&items(&fx), &store, ManifestOptions::default()).unwrap();
        let path = store.paths().manifest_file();

        write_manifest(&path, &build.entries).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let line = content.lines().next().unwrap();
        assert!(line.ends_with("a.jpg|photo"));
        assert_eq!(line.matches('|').count(), 3);

        let loaded = read_manifest(&path).unwrap();
        assert_eq!(loaded, build.entries);
    }

    #[test]
    fn test_parse_line_rejects_malformed() {
        assert!(ManifestEntry::parse_line("nope").is_err());
        assert!(ManifestEntry::parse_line("1|/a|/b|audio").is_err());
        assert!(ManifestEntry::parse_line("x|/a|/b|photo").is_err());
        assert!(ManifestEntry::parse_line("1|/a|/b|/c|photo").is_err());
    }

    #[test]
    fn test_missing_manifest_is_empty() {
        assert!(read_manifest(Path::new("/nonexistent/manifest.txt"))
            .unwrap()
            .is_empty());
    }
}
