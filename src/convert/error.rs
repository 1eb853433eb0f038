use std::path::PathBuf;

use thiserror::Error;

/// Conversion failures. None of these abort a run: the source is recorded
/// as failed and the next run tries again.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Converter exited with {status} for {path}: {stderr}")]
    Tool {
        path: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("Converter produced no output for {0}")]
    EmptyOutput(PathBuf),

    #[error("Converter '{program}' is not available: {reason}")]
    Unavailable { program: String, reason: String },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),
}
