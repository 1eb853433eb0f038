//! Telegram Bot API client for the cloud endpoint and the local proxy.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ClientTimeouts, MediaBackend, TelegramClient};
pub use error::ApiError;
pub use types::{Endpoint, MediaUpload};
