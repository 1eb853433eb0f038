use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;

use crate::cli::{AlbumArgs, SyncArgs};
use crate::retry::RetryConfig;
use crate::types::{GroupRouting, ResetScope, RunMode};

const MIB: u64 = 1024 * 1024;

/// Where an album's state lives. Enough for `status`, `reset` and `repair`.
#[derive(Debug, Clone)]
pub struct AlbumTarget {
    pub album: String,
    pub mode: RunMode,
    pub state_dir: PathBuf,
    pub library_root: Option<PathBuf>,
}

impl AlbumTarget {
    pub fn from_cli(args: &AlbumArgs, state_dir: &str, library_root: Option<&str>) -> Self {
        Self {
            album: args.album.clone(),
            mode: RunMode::from_test_flag(args.test),
            state_dir: expand_tilde(state_dir),
            library_root: library_root.map(expand_tilde),
        }
    }
}

/// Runtime configuration of a sync run.
pub struct Config {
    pub target: AlbumTarget,

    // Credentials and endpoints
    pub chat_id: String,
    pub bot_token: String,
    /// Token used for notifications: the test token in test mode when set.
    pub notify_token: String,
    pub cloud_api_url: String,
    pub proxy_api_url: String,
    pub converter: String,

    pub large_file_threshold: u64,
    pub min_free_memory_mb: u64,
    pub retry: RetryConfig,

    pub batch_size: usize,
    pub parallelism: usize,
    pub max_background: usize,

    pub group_routing: GroupRouting,
    pub reset: ResetScope,

    pub retry_failed: bool,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("target", &self.target)
            .field("chat_id", &self.chat_id)
            .field("bot_token", &"<redacted>")
            .field("notify_token", &"<redacted>")
            .field("cloud_api_url", &self.cloud_api_url)
            .field("proxy_api_url", &self.proxy_api_url)
            .field("batch_size", &self.batch_size)
            .field("large_file_threshold", &self.large_file_threshold)
            .field("group_routing", &self.group_routing)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn validate_url(name: &str, url: &str) -> anyhow::Result<String> {
    let url = url.trim().trim_end_matches('/');
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{} must be an http(s) URL, got '{}'", name, url);
    }
    Ok(url.to_string())
}

impl Config {
    pub fn from_cli(
        args: SyncArgs,
        state_dir: &str,
        library_root: Option<&str>,
    ) -> anyhow::Result<Self> {
        let target = AlbumTarget::from_cli(&args.album, state_dir, library_root);

        let Some(bot_token) = non_empty(args.bot_token) else {
            bail!("BOT_TOKEN (or --bot-token) is required");
        };
        let Some(chat_id) = non_empty(args.chat_id) else {
            bail!("CHAT_ID (or --chat-id) is required");
        };

        let (chat_id, notify_token) = match target.mode {
            RunMode::Production => (chat_id, bot_token.clone()),
            RunMode::Test => {
                let chat = non_empty(args.test_chat_id).unwrap_or(chat_id);
                let token = match non_empty(args.test_bot_token) {
                    Some(t) => t,
                    None => {
                        tracing::warn!("TEST_BOT_TOKEN not set; test notifications use BOT_TOKEN");
                        bot_token.clone()
                    }
                };
                (chat, token)
            }
        };

        Ok(Self {
            target,
            chat_id,
            bot_token,
            notify_token,
            cloud_api_url: validate_url("CLOUD_API_URL", &args.cloud_api_url)?,
            proxy_api_url: validate_url("PROXY_API_URL", &args.proxy_api_url)?,
            converter: args.converter,
            large_file_threshold: args.large_file_mb * MIB,
            min_free_memory_mb: args.min_free_memory_mb,
            retry: RetryConfig {
                max_attempts: args.max_attempts,
                backoff: Duration::from_secs(args.retry_delay),
            },
            batch_size: usize::from(args.batch_size),
            parallelism: usize::from(args.parallelism),
            max_background: usize::from(args.max_background),
            group_routing: args.group_routing,
            reset: args.reset,
            retry_failed: args.retry_failed,
            dry_run: args.dry_run,
            no_progress_bar: args.no_progress_bar,
        })
    }
}
