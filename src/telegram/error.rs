use std::path::PathBuf;

use thiserror::Error;

/// Typed Bot API errors enabling retry classification.
///
/// Everything that happens on the wire is transient from our point of view:
/// the proxy may be restarting, the cloud API may be rate limiting. Only a
/// failure to read the local file aborts the retry loop.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{method}: request failed: {source}")]
    Http {
        method: &'static str,
        source: reqwest::Error,
    },

    #[error("{method}: HTTP {status}: {description}")]
    Status {
        method: &'static str,
        status: u16,
        description: String,
    },

    #[error("{method}: rejected by backend: {description}")]
    Rejected {
        method: &'static str,
        description: String,
    },

    #[error("{method}: unreadable response: {reason}")]
    Decode { method: &'static str, reason: String },

    #[error("Cannot read {path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

impl ApiError {
    /// Wrap a transport error. The request URL embeds the bot token, so it
    /// is stripped before the error can reach a log line.
    pub fn http(method: &'static str, source: reqwest::Error) -> Self {
        ApiError::Http {
            method,
            source: source.without_url(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Http { .. } => true,
            ApiError::Status { .. } => true,
            ApiError::Rejected { .. } => true,
            ApiError::Decode { .. } => true,
            ApiError::File { .. } => false,
            ApiError::Client(_) => false,
        }
    }
}
