//! Per-album, per-mode tracker store.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs4::fs_std::FileExt;

use super::error::TrackerError;
use super::ledger::Ledger;
use crate::types::{ResetScope, RunMode};

/// On-disk layout for one album:
///
/// ```text
/// <state_dir>/<slug>/.lock
/// <state_dir>/<slug>/scratch/            shared by both modes
/// <state_dir>/<slug>/<mode>/sent.txt
/// <state_dir>/<slug>/<mode>/failed.txt
/// <state_dir>/<slug>/<mode>/converted.txt
/// <state_dir>/<slug>/<mode>/manifest.txt
/// ```
#[derive(Debug, Clone)]
pub struct AlbumPaths {
    pub mode: RunMode,
    pub album_dir: PathBuf,
    pub root: PathBuf,
    pub mode_dir: PathBuf,
    pub scratch_dir: PathBuf,
}

impl AlbumPaths {
    pub fn new(state_dir: &Path, album_dir: &Path, mode: RunMode) -> Self {
        let root = state_dir.join(crate::library::album_slug(album_dir));
        Self {
            mode,
            album_dir: album_dir.to_path_buf(),
            mode_dir: root.join(mode.as_str()),
            scratch_dir: root.join("scratch"),
            root,
        }
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.mode_dir.join("manifest.txt")
    }

    pub fn ledger(&self, name: &str) -> PathBuf {
        self.mode_dir.join(format!("{}.txt", name))
    }

    /// The same album under the other run mode.
    pub fn other_mode(&self) -> AlbumPaths {
        let mode = match self.mode {
            RunMode::Production => RunMode::Test,
            RunMode::Test => RunMode::Production,
        };
        AlbumPaths {
            mode,
            album_dir: self.album_dir.clone(),
            root: self.root.clone(),
            mode_dir: self.root.join(mode.as_str()),
            scratch_dir: self.scratch_dir.clone(),
        }
    }
}

/// Counts reported by `status` and in notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerSummary {
    pub sent: usize,
    pub failed: usize,
    pub converted: usize,
}

/// The tracker ledgers of one album in one run mode.
///
/// Holds an exclusive lock on the album for its lifetime so two runs never
/// interleave ledger rewrites. Safe to share behind an `Arc` across tasks.
pub struct TrackerStore {
    paths: AlbumPaths,
    sent: Ledger,
    failed: Ledger,
    converted: Ledger,
    /// Lowercased basename → parent directories of `sent` entries, for
    /// matching a HEIC source against a historical converted-JPEG entry.
    sent_names: Mutex<HashMap<String, HashSet<PathBuf>>>,
    /// Held for the lifetime of the store; the advisory lock is released
    /// when the file is dropped.
    #[allow(dead_code)]
    lock_file: std::fs::File,
}

impl std::fmt::Debug for TrackerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerStore")
            .field("paths", &self.paths)
            .field("summary", &self.summary())
            .finish_non_exhaustive()
    }
}

impl TrackerStore {
    /// Lock the album and load all ledgers for `paths`.
    pub fn open(paths: AlbumPaths) -> Result<Self, TrackerError> {
        std::fs::create_dir_all(&paths.mode_dir)
            .map_err(|e| TrackerError::io(&paths.mode_dir, e))?;

        let lock_path = paths.lock_file();
        let lock_file =
            std::fs::File::create(&lock_path).map_err(|e| TrackerError::io(&lock_path, e))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| TrackerError::Locked { path: lock_path })?;

        let sent = Ledger::open(&paths.ledger("sent"))?;
        let failed = Ledger::open(&paths.ledger("failed"))?;
        let converted = Ledger::open(&paths.ledger("converted"))?;

        let mut sent_names: HashMap<String, HashSet<PathBuf>> = HashMap::new();
        for entry in sent.entries() {
            index_name(&mut sent_names, &entry);
        }

        tracing::debug!(
            sent = sent.len(),
            failed = failed.len(),
            converted = converted.len(),
            "Loaded tracker ledgers from {}",
            paths.mode_dir.display()
        );

        Ok(Self {
            paths,
            sent,
            failed,
            converted,
            sent_names: Mutex::new(sent_names),
            lock_file,
        })
    }

    pub fn paths(&self) -> &AlbumPaths {
        &self.paths
    }

    /// Where the converted JPEG for `source` lives: the full source file
    /// name plus `.jpg`, so `a.HEIC` and `a.heic` never share an artifact.
    pub fn artifact_path(&self, source: &Path) -> PathBuf {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        self.paths.scratch_dir.join(format!("{}.jpg", name))
    }

    /// Whether `source` has been delivered.
    ///
    /// Besides an exact match, a HEIC source also counts as sent when a
    /// `sent` entry outside the album directory carries the same stem with a
    /// `.jpg`/`.jpeg` extension: older ledgers recorded the converted
    /// artifact path instead of the source.
    pub fn is_sent(&self, source: &Path) -> bool {
        if self.sent.contains(source) {
            return true;
        }
        if !is_heic(source) {
            return false;
        }
        let Some(stem) = source.file_stem().and_then(|s| s.to_str()) else {
            return false;
        };
        let names = self.sent_names.lock().unwrap_or_else(|p| p.into_inner());
        ["jpg", "jpeg"].iter().any(|ext| {
            names
                .get(&format!("{}.{}", stem, ext).to_lowercase())
                .is_some_and(|parents| parents.iter().any(|p| p != &self.paths.album_dir))
        })
    }

    pub fn is_failed(&self, source: &Path) -> bool {
        self.failed.contains(source)
    }

    pub fn is_converted(&self, source: &Path) -> bool {
        self.converted.contains(source)
    }

    /// Record a successful upload and clear any earlier failure.
    pub fn record_sent(&self, source: &Path) -> Result<(), TrackerError> {
        if self.sent.insert(source)? {
            let mut names = self.sent_names.lock().unwrap_or_else(|p| p.into_inner());
            index_name(&mut names, source);
        }
        self.failed.remove(source)?;
        Ok(())
    }

    /// Record a failure. A path that is already sent stays sent.
    pub fn record_failed(&self, source: &Path) -> Result<(), TrackerError> {
        if self.sent.contains(source) {
            return Ok(());
        }
        self.failed.insert(source)?;
        Ok(())
    }

    /// Record a successful conversion and clear a conversion failure.
    pub fn record_converted(&self, source: &Path) -> Result<(), TrackerError> {
        self.converted.insert(source)?;
        self.failed.remove(source)?;
        Ok(())
    }

    pub fn failed_paths(&self) -> Vec<PathBuf> {
        self.failed.entries()
    }

    pub fn summary(&self) -> TrackerSummary {
        TrackerSummary {
            sent: self.sent.len(),
            failed: self.failed.len(),
            converted: self.converted.len(),
        }
    }

    /// Drop `converted` entries whose artifact is gone and whose source is
    /// not sent, so the next run converts them again. Returns the sources.
    pub fn repair(&self) -> Result<Vec<PathBuf>, TrackerError> {
        let mut repaired = Vec::new();
        for source in self.converted.entries() {
            if self.is_sent(&source) || self.artifact_path(&source).is_file() {
                continue;
            }
            if self.converted.remove(&source)? {
                tracing::info!("Dropped stale conversion record for {}", source.display());
                repaired.push(source);
            }
        }
        Ok(repaired)
    }

    /// Delete scratch artifacts whose source has been sent, then the scratch
    /// directory itself if nothing is left in it.
    ///
    /// Artifacts the other run mode has converted but not yet sent are kept,
    /// as are artifacts of unsent sources, so no later run has to reconvert.
    /// Leftover `.part.jpg` files from interrupted conversions are removed.
    pub fn cleanup_scratch(&self) -> Result<usize, TrackerError> {
        let scratch = &self.paths.scratch_dir;
        if !scratch.is_dir() {
            return Ok(0);
        }

        let other = self.paths.other_mode();
        let other_converted = Ledger::open(&other.ledger("converted"))?;
        let other_sent = Ledger::open(&other.ledger("sent"))?;

        let mut removed = 0;
        for source in self.sent.entries() {
            if !is_heic(&source) {
                continue;
            }
            if other_converted.contains(&source) && !other_sent.contains(&source) {
                continue;
            }
            let artifact = self.artifact_path(&source);
            match std::fs::remove_file(&artifact) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(TrackerError::io(&artifact, e)),
            }
        }

        let entries = std::fs::read_dir(scratch).map_err(|e| TrackerError::io(scratch, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let partial = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".part.jpg"));
            if partial && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        // Only succeeds once nothing is left.
        if std::fs::remove_dir(scratch).is_ok() {
            tracing::debug!("Removed empty scratch directory {}", scratch.display());
        }
        Ok(removed)
    }

    /// Clear state for this mode.
    ///
    /// `Upload` clears `sent`, `failed` and the manifest but keeps
    /// `converted`. `All` also clears `converted` and deletes this mode's
    /// artifacts, except those the other mode has converted but not sent.
    pub fn reset(&self, scope: ResetScope) -> Result<(), TrackerError> {
        match scope {
            ResetScope::None => return Ok(()),
            ResetScope::Upload => {}
            ResetScope::All => {
                let removed = self.remove_own_artifacts()?;
                if removed > 0 {
                    tracing::info!(removed, "Deleted converted artifacts");
                }
                self.converted.clear()?;
            }
        }
        self.sent.clear()?;
        self.failed.clear()?;
        self.sent_names
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        let manifest = self.paths.manifest_file();
        match std::fs::remove_file(&manifest) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(TrackerError::io(&manifest, e)),
        }
        tracing::info!(?scope, "Reset tracker state in {}", self.paths.mode_dir.display());
        Ok(())
    }
}

impl TrackerStore {
    /// Delete the artifact of every `converted` source of this mode unless
    /// the other mode still needs it. Returns how many files were removed.
    fn remove_own_artifacts(&self) -> Result<usize, TrackerError> {
        let other = self.paths.other_mode();
        let other_converted = Ledger::open(&other.ledger("converted"))?;
        let other_sent = Ledger::open(&other.ledger("sent"))?;

        let mut removed = 0;
        for source in self.converted.entries() {
            if other_converted.contains(&source) && !other_sent.contains(&source) {
                continue;
            }
            let artifact = self.artifact_path(&source);
            match std::fs::remove_file(&artifact) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(TrackerError::io(&artifact, e)),
            }
        }
        Ok(removed)
    }
}

fn is_heic(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("heic"))
}

fn index_name(names: &mut HashMap<String, HashSet<PathBuf>>, entry: &Path) {
    if let (Some(name), Some(parent)) = (
        entry.file_name().and_then(|n| n.to_str()),
        entry.parent(),
    ) {
        names
            .entry(name.to_lowercase())
            .or_default()
            .insert(parent.to_path_buf());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _state: TempDir,
        album: PathBuf,
        paths: AlbumPaths,
    }

    fn fixture(mode: RunMode) -> Fixture {
        let state = TempDir::new().unwrap();
        let album = state.path().join("albums").join("Trip");
        std::fs::create_dir_all(&album).unwrap();
        let paths = AlbumPaths::new(&state.path().join("state"), &album, mode);
        Fixture {
            _state: state,
            album,
            paths,
        }
    }

    #[test]
    fn test_layout() {
        let f = fixture(RunMode::Test);
        assert!(f.paths.mode_dir.ends_with("Trip/test"));
        assert!(f.paths.scratch_dir.ends_with("Trip/scratch"));
        assert!(f.paths.manifest_file().ends_with("Trip/test/manifest.txt"));
    }

    #[test]
    fn test_sent_clears_failed() {
        let f = fixture(RunMode::Production);
        let store = TrackerStore::open(f.paths.clone()).unwrap();
        let a = f.album.join("a.jpg");

        store.record_failed(&a).unwrap();
        assert!(store.is_failed(&a));
        store.record_sent(&a).unwrap();
        assert!(store.is_sent(&a));
        assert!(!store.is_failed(&a));

        // A later failure report cannot demote a sent item.
        store.record_failed(&a).unwrap();
        assert!(!store.is_failed(&a));
    }

    #[test]
    fn test_state_survives_reopen() {
        let f = fixture(RunMode::Production);
        let a = f.album.join("a.jpg");
        {
            let store = TrackerStore::open(f.paths.clone()).unwrap();
            store.record_sent(&a).unwrap();
            store.record_converted(&f.album.join("b.heic")).unwrap();
        }
        let store = TrackerStore::open(f.paths.clone()).unwrap();
        assert!(store.is_sent(&a));
        assert_eq!(
            store.summary(),
            TrackerSummary {
                sent: 1,
                failed: 0,
                converted: 1
            }
        );
    }

    #[test]
    fn test_heic_matches_historical_converted_entry() {
        let f = fixture(RunMode::Production);
        let store = TrackerStore::open(f.paths.clone()).unwrap();
        let heic = f.album.join("IMG_0001.HEIC");
        store
            .record_sent(&f.paths.scratch_dir.join("IMG_0001.jpg"))
            .unwrap();
        assert!(store.is_sent(&heic));
        assert!(!store.is_sent(&f.album.join("IMG_0002.HEIC")));
    }

    #[test]
    fn test_heic_does_not_match_sibling_original_jpeg() {
        let f = fixture(RunMode::Production);
        let store = TrackerStore::open(f.paths.clone()).unwrap();
        store.record_sent(&f.album.join("IMG_0003.JPG")).unwrap();
        assert!(!store.is_sent(&f.album.join("IMG_0003.HEIC")));
    }

    #[test]
    fn test_modes_are_isolated() {
        let f = fixture(RunMode::Production);
        let a = f.album.join("a.jpg");
        {
            let store = TrackerStore::open(f.paths.clone()).unwrap();
            store.record_sent(&a).unwrap();
        }
        let state_dir = f.paths.root.parent().unwrap().to_path_buf();
        let test_paths = AlbumPaths::new(&state_dir, &f.album, RunMode::Test);
        let store = TrackerStore::open(test_paths).unwrap();
        assert!(!store.is_sent(&a));
    }

    #[test]
    fn test_reset_upload_keeps_converted() {
        let f = fixture(RunMode::Production);
        let store = TrackerStore::open(f.paths.clone()).unwrap();
        let heic = f.album.join("x.heic");
        store.record_converted(&heic).unwrap();
        store.record_sent(&heic).unwrap();
        std::fs::write(f.paths.manifest_file(), "0|a|a|photo\n").unwrap();

        store.reset(ResetScope::Upload).unwrap();
        assert!(!store.is_sent(&heic));
        assert!(store.is_converted(&heic));
        assert!(!f.paths.manifest_file().exists());

        store.reset(ResetScope::All).unwrap();
        assert!(!store.is_converted(&heic));
    }

    #[test]
    fn test_second_open_is_locked() {
        let f = fixture(RunMode::Production);
        let _first = TrackerStore::open(f.paths.clone()).unwrap();
        assert!(matches!(
            TrackerStore::open(f.paths.clone()),
            Err(TrackerError::Locked { .. })
        ));
    }

    #[test]
    fn test_cleanup_removes_only_sent_artifacts() {
        let f = fixture(RunMode::Production);
        let store = TrackerStore::open(f.paths.clone()).unwrap();
        let sent = f.album.join("a.HEIC");
        let unsent = f.album.join("b.HEIC");
        std::fs::create_dir_all(&f.paths.scratch_dir).unwrap();
        for source in [&sent, &unsent] {
            std::fs::write(store.artifact_path(source), b"jpg").unwrap();
            store.record_converted(source).unwrap();
        }
        std::fs::write(f.paths.scratch_dir.join("c.part.jpg"), b"").unwrap();
        store.record_sent(&sent).unwrap();

        assert_eq!(store.cleanup_scratch().unwrap(), 2);
        assert!(!store.artifact_path(&sent).exists());
        assert!(store.artifact_path(&unsent).exists());
        assert!(f.paths.scratch_dir.exists());

        store.record_sent(&unsent).unwrap();
        store.cleanup_scratch().unwrap();
        assert!(!f.paths.scratch_dir.exists());
    }

    #[test]
    fn test_cleanup_keeps_artifacts_the_other_mode_needs() {
        let f = fixture(RunMode::Test);
        let heic = f.album.join("a.HEIC");
        {
            let prod = TrackerStore::open(f.paths.other_mode()).unwrap();
            prod.record_converted(&heic).unwrap();
        }
        let store = TrackerStore::open(f.paths.clone()).unwrap();
        std::fs::create_dir_all(&f.paths.scratch_dir).unwrap();
        std::fs::write(store.artifact_path(&heic), b"jpg").unwrap();
        store.record_converted(&heic).unwrap();
        store.record_sent(&heic).unwrap();

        assert_eq!(store.cleanup_scratch().unwrap(), 0);
        assert!(store.artifact_path(&heic).exists());
    }

    #[test]
    fn test_repair_drops_stale_conversions() {
        let f = fixture(RunMode::Production);
        let store = TrackerStore::open(f.paths.clone()).unwrap();
        let stale = f.album.join("stale.HEIC");
        let present = f.album.join("present.HEIC");
        let delivered = f.album.join("delivered.HEIC");
        for source in [&stale, &present, &delivered] {
            store.record_converted(source).unwrap();
        }
        store.record_sent(&delivered).unwrap();
        std::fs::create_dir_all(&f.paths.scratch_dir).unwrap();
        std::fs::write(store.artifact_path(&present), b"jpg").unwrap();

        assert_eq!(store.repair().unwrap(), vec![stale.clone()]);
        assert!(!store.is_converted(&stale));
        assert!(store.is_converted(&present));
        assert!(store.is_converted(&delivered));
    }

    #[test]
    fn test_artifact_path_keeps_full_name() {
        let f = fixture(RunMode::Production);
        let store = TrackerStore::open(f.paths.clone()).unwrap();
        let upper = store.artifact_path(&f.album.join("IMG_9.HEIC"));
        let lower = store.artifact_path(&f.album.join("IMG_9.heic"));
        assert_eq!(upper, f.paths.scratch_dir.join("IMG_9.HEIC.jpg"));
        assert_ne!(upper, lower);
    }

    #[test]
    fn test_cleanup_keeps_artifact_of_part_named_source() {
        let f = fixture(RunMode::Production);
        let store = TrackerStore::open(f.paths.clone()).unwrap();
        std::fs::create_dir_all(&f.paths.scratch_dir).unwrap();
        let source = f.album.join("X.part.HEIC");
        let artifact = store.artifact_path(&source);
        std::fs::write(&artifact, b"jpg").unwrap();
        store.record_converted(&source).unwrap();

        store.cleanup_scratch().unwrap();

        assert!(artifact.exists());
    }

    #[test]
    fn test_reset_all_deletes_own_artifacts() {
        let f = fixture(RunMode::Production);
        let store = TrackerStore::open(f.paths.clone()).unwrap();
        std::fs::create_dir_all(&f.paths.scratch_dir).unwrap();
        let mine = f.album.join("mine.HEIC");
        let shared = f.album.join("shared.HEIC");
        for source in [&mine, &shared] {
            std::fs::write(store.artifact_path(source), b"jpg").unwrap();
            store.record_converted(source).unwrap();
        }
        let other = Ledger::open(&f.paths.other_mode().ledger("converted")).unwrap();
        other.insert(&shared).unwrap();

        store.reset(ResetScope::All).unwrap();

        assert!(!store.artifact_path(&mine).exists());
        assert!(store.artifact_path(&shared).exists());
        assert!(!store.is_converted(&mine));
    }

    #[test]
    fn test_reset_upload_keeps_artifacts() {
        let f = fixture(RunMode::Production);
        let store = TrackerStore::open(f.paths.clone()).unwrap();
        std::fs::create_dir_all(&f.paths.scratch_dir).unwrap();
        let source = f.album.join("a.HEIC");
        std::fs::write(store.artifact_path(&source), b"jpg").unwrap();
        store.record_converted(&source).unwrap();

        store.reset(ResetScope::Upload).unwrap();

        assert!(store.artifact_path(&source).exists());
    }
}
