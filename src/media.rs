//! Media kinds and album discovery.
//!
//! Every file found in an album directory is classified exactly once, from its
//! extension, into a [`MediaKind`]. Downstream stages match on the kind
//! instead of re-inspecting extensions.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
    Unsupported,
}

impl MediaKind {
    /// Classify a file by extension (case-insensitive).
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "heic" => MediaKind::Photo,
            "mp4" | "mov" => MediaKind::Video,
            _ => MediaKind::Unsupported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Unsupported => "unsupported",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(MediaKind::Photo),
            "video" => Some(MediaKind::Video),
            "unsupported" => Some(MediaKind::Unsupported),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file discovered in an album directory. Identity is `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Lowercased extension without the dot.
    pub extension: String,
    pub size: u64,
}

impl SourceItem {
    /// HEIC sources are uploaded as a converted JPEG artifact.
    pub fn needs_conversion(&self) -> bool {
        self.kind == MediaKind::Photo && self.extension == "heic"
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("")
    }
}

/// Result of scanning an album: supported items in discovery order plus
/// the paths that were skipped as unsupported or could not be read.
#[derive(Debug, Default)]
pub struct AlbumScan {
    pub items: Vec<SourceItem>,
    pub unsupported: Vec<PathBuf>,
    pub unreadable: Vec<PathBuf>,
}

/// Build items from `(directory, filename)` pairs as returned by a
/// [`crate::library::MediaLibrary`].
///
/// Discovery order is the order of `entries`. Directories are ignored.
/// Entries that cannot be stat'ed land in `unreadable` so the caller can
/// record them as failed; a single bad entry never aborts the scan.
pub fn scan_entries(entries: &[(PathBuf, String)]) -> AlbumScan {
    let mut scan = AlbumScan::default();
    for (dir, name) in entries {
        let path = dir.join(name);
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Cannot stat {}: {}", path.display(), e);
                scan.unreadable.push(path);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        let kind = MediaKind::from_path(&path);
        if kind == MediaKind::Unsupported {
            tracing::debug!("Skipping unsupported file {}", path.display());
            scan.unsupported.push(path);
            continue;
        }
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        scan.items.push(SourceItem {
            path,
            kind,
            extension,
            size: metadata.len(),
        });
    }
    scan
}

/// List the top-level files of `dir` as `(dir, filename)` pairs, sorted by
/// filename so discovery order is stable across filesystems.
pub fn list_directory(dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut names = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("Reading album {}", dir.display()))?
    {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with('.') {
                continue;
            }
            names.push(name.to_string());
        } else {
            tracing::warn!("Skipping non-UTF-8 file name in {}", dir.display());
        }
    }
    names.sort();
    Ok(names.into_iter().map(|n| (dir.to_path_buf(), n)).collect())
}
