use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio_util::io::ReaderStream;

use super::error::ApiError;
use super::types::{ApiResponse, Endpoint, InputMedia, MediaUpload};
use crate::media::MediaKind;

/// Operations the uploader and the notifier need from the messaging backend.
///
/// Each call is a single attempt; retries are the caller's business.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// `sendPhoto` or `sendVideo`, depending on the item's kind.
    async fn send_single(
        &self,
        endpoint: Endpoint,
        chat_id: &str,
        item: &MediaUpload,
    ) -> Result<(), ApiError>;

    /// `sendMediaGroup` with 2..=10 items.
    async fn send_group(
        &self,
        endpoint: Endpoint,
        chat_id: &str,
        items: &[MediaUpload],
    ) -> Result<(), ApiError>;

    async fn send_message(
        &self,
        endpoint: Endpoint,
        chat_id: &str,
        text: &str,
    ) -> Result<(), ApiError>;

    /// Health check. Returns the bot's username when the backend reports one.
    async fn get_me(&self, endpoint: Endpoint) -> Result<Option<String>, ApiError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ClientTimeouts {
    pub connect: Duration,
    /// Total time for one upload request.
    pub upload: Duration,
    /// Total time for `getMe` and `sendMessage`.
    pub control: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            upload: Duration::from_secs(600),
            control: Duration::from_secs(15),
        }
    }
}

/// Bot API client for the cloud and proxy endpoints, sharing one token.
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    cloud_url: String,
    proxy_url: String,
    token: String,
    timeouts: ClientTimeouts,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("cloud_url", &self.cloud_url)
            .field("proxy_url", &self.proxy_url)
            .field("token", &"<redacted>")
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl TelegramClient {
    pub fn new(
        cloud_url: &str,
        proxy_url: &str,
        token: &str,
        timeouts: ClientTimeouts,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(ApiError::Client)?;
        Ok(Self {
            http,
            cloud_url: cloud_url.trim_end_matches('/').to_string(),
            proxy_url: proxy_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            timeouts,
        })
    }

    fn method_url(&self, endpoint: Endpoint, method: &str) -> String {
        let base = match endpoint {
            Endpoint::Cloud => &self.cloud_url,
            Endpoint::Proxy => &self.proxy_url,
        };
        format!("{}/bot{}/{}", base, self.token, method)
    }

    async fn post_form(
        &self,
        endpoint: Endpoint,
        method: &'static str,
        form: Form,
    ) -> Result<ApiResponse, ApiError> {
        let response = self
            .http
            .post(self.method_url(endpoint, method))
            .timeout(self.timeouts.upload)
            .multipart(form)
            .send()
            .await
            .map_err(|source| ApiError::http(method, source))?;
        read_response(method, response).await
    }
}

/// Stream `path` from disk as a multipart file part.
async fn file_part(item: &MediaUpload) -> Result<Part, ApiError> {
    let file_error = |source| ApiError::File {
        path: item.path.clone(),
        source,
    };
    let file = tokio::fs::File::open(&item.path).await.map_err(file_error)?;
    let len = file.metadata().await.map_err(file_error)?.len();
    let body = Body::wrap_stream(ReaderStream::new(file));
    Ok(Part::stream_with_length(body, len).file_name(item.file_name()))
}

/// Map status and `ok` into a result. A non-2xx status wins over the body.
async fn read_response(
    method: &'static str,
    response: reqwest::Response,
) -> Result<ApiResponse, ApiError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| ApiError::http(method, source))?;
    let parsed = serde_json::from_str::<ApiResponse>(&body);

    if !status.is_success() {
        let description = parsed
            .ok()
            .and_then(|r| r.description)
            .unwrap_or_else(|| truncate(&body, 200));
        return Err(ApiError::Status {
            method,
            status: status.as_u16(),
            description,
        });
    }

    let parsed = parsed.map_err(|e| ApiError::Decode {
        method,
        reason: e.to_string(),
    })?;
    if !parsed.ok {
        return Err(ApiError::Rejected {
            method,
            description: parsed
                .description
                .clone()
                .unwrap_or_else(|| "no description".to_string()),
        });
    }
    Ok(parsed)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[async_trait]
impl MediaBackend for TelegramClient {
    async fn send_single(
        &self,
        endpoint: Endpoint,
        chat_id: &str,
        item: &MediaUpload,
    ) -> Result<(), ApiError> {
        let method = item.single_method();
        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part(item.field_name(), file_part(item).await?);
        if item.kind == MediaKind::Video {
            // Lets clients play the video before it is fully downloaded.
            form = form.text("supports_streaming", "true");
        }
        self.post_form(endpoint, method, form).await?;
        Ok(())
    }

    async fn send_group(
        &self,
        endpoint: Endpoint,
        chat_id: &str,
        items: &[MediaUpload],
    ) -> Result<(), ApiError> {
        let media: Vec<InputMedia> = items
            .iter()
            .enumerate()
            .map(|(i, item)| InputMedia::attached(i, item))
            .collect();
        let media = serde_json::to_string(&media).map_err(|e| ApiError::Decode {
            method: "sendMediaGroup",
            reason: e.to_string(),
        })?;

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("media", media);
        for (i, item) in items.iter().enumerate() {
            form = form.part(format!("file{}", i), file_part(item).await?);
        }
        self.post_form(endpoint, "sendMediaGroup", form).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        endpoint: Endpoint,
        chat_id: &str,
        text: &str,
    ) -> Result<(), ApiError> {
        let method = "sendMessage";
        let response = self
            .http
            .post(self.method_url(endpoint, method))
            .timeout(self.timeouts.control)
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|source| ApiError::http(method, source))?;
        read_response(method, response).await?;
        Ok(())
    }

    async fn get_me(&self, endpoint: Endpoint) -> Result<Option<String>, ApiError> {
        let method = "getMe";
        let response = self
            .http
            .get(self.method_url(endpoint, method))
            .timeout(self.timeouts.control)
            .send()
            .await
            .map_err(|source| ApiError::http(method, source))?;
        let parsed = read_response(method, response).await?;
        Ok(parsed
            .result
            .as_ref()
            .and_then(|r| r.get("username"))
            .and_then(|u| u.as_str())
            .map(str::to_string))
    }
}
