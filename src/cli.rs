use clap::{Args, Parser, Subcommand};

use crate::types::{GroupRouting, LogLevel, ResetScope};

#[derive(Parser, Debug)]
#[command(
    name = "album-courier",
    version,
    about = "Upload a photo album to a Telegram chat in chronological order, resumably"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Also append warnings and errors to this file
    #[arg(long, global = true)]
    pub error_log: Option<String>,

    /// Directory holding per-album tracker state
    #[arg(long, default_value = "~/.album-courier", env = "STATE_DIR", global = true)]
    pub state_dir: String,

    /// Directory whose subdirectories are albums
    #[arg(long, env = "LIBRARY_ROOT", global = true)]
    pub library_root: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert, order and upload an album
    Sync(SyncArgs),
    /// Show tracker counts for an album
    Status(StatusArgs),
    /// Clear tracker state for an album
    Reset(ResetArgs),
    /// Drop conversion records whose artifact has disappeared
    Repair(AlbumArgs),
}

/// Album selection shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct AlbumArgs {
    /// Album directory, or album name under --library-root
    pub album: String,

    /// Use the test ledgers (and test chat when configured)
    #[arg(long)]
    pub test: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub album: AlbumArgs,

    /// List failed paths
    #[arg(long)]
    pub failed: bool,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    #[command(flatten)]
    pub album: AlbumArgs,

    /// What to clear
    #[arg(long, value_enum, default_value = "upload")]
    pub scope: ResetScope,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub album: AlbumArgs,

    /// Clear tracker state before the run
    #[arg(long, value_enum, default_value = "none")]
    pub reset: ResetScope,

    /// Only retry items currently recorded as failed
    #[arg(long)]
    pub retry_failed: bool,

    /// Plan and log without converting, uploading or writing ledgers
    #[arg(long)]
    pub dry_run: bool,

    /// Target chat
    #[arg(long, env = "CHAT_ID")]
    pub chat_id: Option<String>,

    /// Bot token used for uploads
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    /// Bot token for notifications in test mode
    #[arg(long, env = "TEST_BOT_TOKEN", hide_env_values = true)]
    pub test_bot_token: Option<String>,

    /// Chat used in test mode (defaults to CHAT_ID)
    #[arg(long, env = "TEST_CHAT_ID")]
    pub test_chat_id: Option<String>,

    /// Base URL of the local Bot API server
    #[arg(long, env = "PROXY_API_URL", default_value = "http://127.0.0.1:8081")]
    pub proxy_api_url: String,

    /// Base URL of the cloud Bot API
    #[arg(long, env = "CLOUD_API_URL", default_value = "https://api.telegram.org")]
    pub cloud_api_url: String,

    /// Items per media group
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(2..=10))]
    pub batch_size: u8,

    /// Payloads above this many MiB go through the proxy
    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u64).range(1..))]
    pub large_file_mb: u64,

    /// Endpoint policy for media groups
    #[arg(long, value_enum, default_value = "size")]
    pub group_routing: GroupRouting,

    /// Concurrent conversions
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..))]
    pub parallelism: u16,

    /// Concurrent background uploads of oversize videos
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u16).range(1..))]
    pub max_background: u16,

    /// Do not start a background upload while less memory than this is available
    #[arg(long, default_value_t = 512)]
    pub min_free_memory_mb: u64,

    /// Attempts per request, including the first
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    /// Seconds between attempts
    #[arg(long, default_value_t = 3)]
    pub retry_delay: u64,

    /// Image conversion program (ImageMagick)
    #[arg(long, env = "CONVERTER", default_value = "magick")]
    pub converter: String,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}
