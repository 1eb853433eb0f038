use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::media::MediaKind;

/// Which Bot API server a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// The public cloud API. Small uploads only.
    Cloud,
    /// The locally hosted Bot API server, used for oversized payloads.
    Proxy,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Endpoint::Cloud => "cloud",
            Endpoint::Proxy => "proxy",
        })
    }
}

/// One file to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub size: u64,
}

impl MediaUpload {
    /// `sendPhoto` / `sendVideo` for a single item.
    pub fn single_method(&self) -> &'static str {
        match self.kind {
            MediaKind::Video => "sendVideo",
            _ => "sendPhoto",
        }
    }

    /// Multipart field name for a single item.
    pub fn field_name(&self) -> &'static str {
        match self.kind {
            MediaKind::Video => "video",
            _ => "photo",
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string())
    }
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// Element of the `media` array of `sendMediaGroup`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct InputMedia {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub media: String,
}

impl InputMedia {
    /// Reference to the multipart field `file{index}`.
    pub fn attached(index: usize, item: &MediaUpload) -> Self {
        Self {
            kind: item.field_name(),
            media: format!("attach://file{}", index),
        }
    }
}
