use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Which set of upload ledgers a run reads and writes.
///
/// Test runs keep their own `sent`/`failed` state so they never suppress or
/// pollute a production sync of the same album.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    Production,
    Test,
}

impl RunMode {
    pub fn from_test_flag(test: bool) -> Self {
        if test {
            RunMode::Test
        } else {
            RunMode::Production
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Production => "production",
            RunMode::Test => "test",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much tracker state to clear before a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ResetScope {
    /// Keep everything.
    None,
    /// Clear `sent` and `failed`; keep `converted` so nothing is reconverted.
    Upload,
    /// Clear every ledger, including conversion state and the manifest.
    All,
}

/// Endpoint policy for media-group requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GroupRouting {
    /// Route a group to the proxy only when its payload exceeds the
    /// large-file threshold.
    Size,
    /// Route every group through the proxy.
    Proxy,
}
