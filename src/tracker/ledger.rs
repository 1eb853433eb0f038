//! Append-only path ledger backed by a newline-delimited file.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::error::TrackerError;

/// A set of absolute paths mirrored to a text file, one path per line.
///
/// Inserts append a single line with one `write_all` on an `O_APPEND`
/// handle. Removals rewrite the file to a sibling temp file and rename it
/// over the ledger, so a reader never observes a half-edited file.
pub struct Ledger {
    path: PathBuf,
    /// Guards the cache and serializes file mutations across tasks.
    entries: Mutex<HashSet<PathBuf>>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

impl Ledger {
    /// Load a ledger, creating nothing on disk until the first insert.
    ///
    /// Duplicate and blank lines are tolerated and collapse on load.
    pub fn open(path: &Path) -> Result<Self, TrackerError> {
        let entries = match std::fs::read_to_string(path) {
            Ok(content) => content
                .lines()
                .map(str::trim_end)
                .filter(|l| !l.is_empty())
                .map(PathBuf::from)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(TrackerError::io(path, e)),
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, entry: &Path) -> bool {
        self.lock().contains(entry)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of the current entries, sorted for stable output.
    pub fn entries(&self) -> Vec<PathBuf> {
        let mut v: Vec<PathBuf> = self.lock().iter().cloned().collect();
        v.sort();
        v
    }

    /// Record `entry`. Returns `false` without touching the file when it is
    /// already present.
    pub fn insert(&self, entry: &Path) -> Result<bool, TrackerError> {
        let line = ledger_line(entry)?;
        let mut entries = self.lock();
        if entries.contains(entry) {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TrackerError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TrackerError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| TrackerError::io(&self.path, e))?;
        entries.insert(entry.to_path_buf());
        Ok(true)
    }

    /// Drop `entry` from the ledger. Returns `false` if it was absent.
    pub fn remove(&self, entry: &Path) -> Result<bool, TrackerError> {
        let mut entries = self.lock();
        if !entries.contains(entry) {
            return Ok(false);
        }
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(TrackerError::io(&self.path, e)),
        };
        let kept: String = content
            .lines()
            .filter(|l| !l.is_empty() && Path::new(l.trim_end()) != entry)
            .map(|l| format!("{}\n", l))
            .collect();
        let tmp = self.path.with_extension("txt.tmp");
        std::fs::write(&tmp, kept).map_err(|e| TrackerError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| TrackerError::io(&self.path, e))?;
        entries.remove(entry);
        Ok(true)
    }

    /// Delete the ledger file and empty the cache.
    pub fn clear(&self) -> Result<(), TrackerError> {
        let mut entries = self.lock();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(TrackerError::io(&self.path, e)),
        }
        entries.clear();
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        // Poisoning is ignored: the set is only touched after its file write.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn ledger_line(entry: &Path) -> Result<String, TrackerError> {
    let s = entry
        .to_str()
        .ok_or_else(|| TrackerError::InvalidPath(entry.to_path_buf()))?;
    if s.is_empty() || s.contains('\n') || s.contains('\r') {
        return Err(TrackerError::InvalidPath(entry.to_path_buf()));
    }
    Ok(format!("{}\n", s))
}
