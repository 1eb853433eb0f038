//! Notification channel. Messages carry counts only; failure detail goes to
//! the log.

use std::sync::Arc;

use async_trait::async_trait;

use crate::telegram::{ApiError, Endpoint, MediaBackend};
use crate::types::RunMode;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), ApiError>;
}

/// Sends notifications as plain `sendMessage` calls on the cloud endpoint.
pub struct BotNotifier {
    backend: Arc<dyn MediaBackend>,
    chat_id: String,
}

impl BotNotifier {
    pub fn new(backend: Arc<dyn MediaBackend>, chat_id: impl Into<String>) -> Self {
        Self {
            backend,
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl Notifier for BotNotifier {
    async fn send_text(&self, text: &str) -> Result<(), ApiError> {
        self.backend
            .send_message(Endpoint::Cloud, &self.chat_id, text)
            .await
    }
}

/// Send `text`, logging instead of failing.
pub async fn notify(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.send_text(text).await {
        tracing::warn!("Notification not delivered: {}", e);
    }
}

/// Counts shown in progress and final messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub sent: usize,
    pub failed: usize,
    pub pending: usize,
}

pub fn batch_message(album: &str, batch: usize, batches: usize, progress: Progress) -> String {
    format!(
        "{}: batch {}/{} done. Sent {}, failed {}, pending {}.",
        album, batch, batches, progress.sent, progress.failed, progress.pending
    )
}

pub fn final_message(album: &str, mode: RunMode, progress: Progress, skipped: usize) -> String {
    let mut text = format!(
        "{} [{}]: finished. Sent {}, failed {}, pending {}",
        album, mode, progress.sent, progress.failed, progress.pending
    );
    if skipped > 0 {
        text.push_str(&format!(", skipped {} unsupported", skipped));
    }
    text.push('.');
    if progress.failed > 0 {
        text.push_str(" Re-run with --retry-failed to try the failures again.");
    }
    text
}

pub fn nothing_to_send(album: &str, mode: RunMode) -> String {
    format!("{} [{}]: nothing new to send.", album, mode)
}

pub fn aborted_message(album: &str, mode: RunMode) -> String {
    format!("{} [{}]: run aborted, see the log for details.", album, mode)
}
