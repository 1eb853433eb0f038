//! Error types for the tracker store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing ledger files.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// A ledger, manifest or state directory could not be read or written.
    #[error("Tracker I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Another run holds the album lock.
    #[error("Another run is already syncing this album (lock: {path})")]
    Locked { path: PathBuf },

    /// The path cannot be stored in a line-oriented ledger.
    #[error("Path cannot be recorded in a ledger: {0:?}")]
    InvalidPath(PathBuf),
}

impl TrackerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
