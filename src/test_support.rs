//! In-process fakes and filesystem fixtures shared by unit tests.

use std::collections::HashSet;
use std::fs::FileTimes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::convert::{ConvertError, ImageConverter};
use crate::notify::Notifier;
use crate::telegram::{ApiError, Endpoint, MediaBackend, MediaUpload};
use crate::tracker::{AlbumPaths, TrackerStore};
use crate::types::RunMode;

/// A temporary album directory plus a state directory beside it.
pub struct StateFixture {
    _root: TempDir,
    pub album: PathBuf,
    pub state_dir: PathBuf,
}

impl StateFixture {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let base = root.path().canonicalize().unwrap();
        let album = base.join("albums").join("Trip");
        std::fs::create_dir_all(&album).unwrap();
        Self {
            _root: root,
            album,
            state_dir: base.join("state"),
        }
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.album.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    pub fn paths(&self, mode: RunMode) -> AlbumPaths {
        AlbumPaths::new(&self.state_dir, &self.album, mode)
    }

    pub fn open_store(&self) -> TrackerStore {
        TrackerStore::open(self.paths(RunMode::Production)).unwrap()
    }
}

pub fn set_mtime(path: &Path, secs: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_times(FileTimes::new().set_modified(UNIX_EPOCH + Duration::from_secs(secs)))
        .unwrap();
}

pub fn ledger_lines(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|c| c.lines().count())
        .unwrap_or(0)
}

/// Writes a few bytes to the target; fails for sources named `bad*`.
#[derive(Default)]
pub struct FakeConverter {
    pub calls: AtomicUsize,
    pub unavailable: bool,
}

#[async_trait]
impl ImageConverter for FakeConverter {
    async fn check(&self) -> Result<(), ConvertError> {
        if self.unavailable {
            return Err(ConvertError::Unavailable {
                program: "fake".into(),
                reason: "not installed".into(),
            });
        }
        Ok(())
    }

    async fn convert(
        &self,
        source: &Path,
        target: &Path,
        _max_dimension: u32,
        _quality: u8,
    ) -> Result<(), ConvertError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if name.starts_with("bad") {
            // Leave a partial file behind, like a tool that died midway.
            let _ = std::fs::write(target, b"");
            return Err(ConvertError::Tool {
                path: source.to_path_buf(),
                status: "exit status: 1".into(),
                stderr: "no decode delegate".into(),
            });
        }
        std::fs::write(target, b"\xFF\xD8converted")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    pub method: &'static str,
    pub endpoint: Endpoint,
    pub files: Vec<PathBuf>,
}

/// Records every request. Uploads of missing files fail like the real
/// client does; other failures are switched on per test.
#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<BackendCall>>,
    messages: Mutex<Vec<(Endpoint, String, String)>>,
    fail_uploads: AtomicBool,
    fail_messages: AtomicBool,
    fail_get_me: AtomicBool,
    /// File names whose uploads always fail.
    failing_files: Mutex<HashSet<String>>,
    pub get_me_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<(Endpoint, String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_messages(&self, fail: bool) {
        self.fail_messages.store(fail, Ordering::SeqCst);
    }

    pub fn fail_get_me(&self, fail: bool) {
        self.fail_get_me.store(fail, Ordering::SeqCst);
    }

    pub fn fail_file(&self, name: &str) {
        self.failing_files.lock().unwrap().insert(name.to_string());
    }

    /// Every file passed to an upload call, in call order.
    pub fn requested_files(&self) -> Vec<PathBuf> {
        self.calls().into_iter().flat_map(|c| c.files).collect()
    }

    fn upload(
        &self,
        method: &'static str,
        endpoint: Endpoint,
        items: &[MediaUpload],
    ) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(BackendCall {
            method,
            endpoint,
            files: items.iter().map(|i| i.path.clone()).collect(),
        });
        for item in items {
            if !item.path.is_file() {
                return Err(ApiError::File {
                    path: item.path.clone(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
        }
        let failing = self.failing_files.lock().unwrap();
        let named_failure = items.iter().any(|i| failing.contains(&i.file_name()));
        if named_failure || self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                method,
                status: 502,
                description: "Bad Gateway".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    async fn send_single(
        &self,
        endpoint: Endpoint,
        _chat_id: &str,
        item: &MediaUpload,
    ) -> Result<(), ApiError> {
        self.upload(item.single_method(), endpoint, std::slice::from_ref(item))
    }

    async fn send_group(
        &self,
        endpoint: Endpoint,
        _chat_id: &str,
        items: &[MediaUpload],
    ) -> Result<(), ApiError> {
        self.upload("sendMediaGroup", endpoint, items)
    }

    async fn send_message(
        &self,
        endpoint: Endpoint,
        chat_id: &str,
        text: &str,
    ) -> Result<(), ApiError> {
        if self.fail_messages.load(Ordering::SeqCst) {
            return Err(ApiError::Rejected {
                method: "sendMessage",
                description: "chat not found".into(),
            });
        }
        self.messages
            .lock()
            .unwrap()
            .push((endpoint, chat_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn get_me(&self, _endpoint: Endpoint) -> Result<Option<String>, ApiError> {
        self.get_me_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get_me.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                method: "getMe",
                status: 502,
                description: "Bad Gateway".into(),
            });
        }
        Ok(Some("courier_bot".into()))
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    messages: Mutex<Vec<String>>,
}

impl FakeNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send_text(&self, text: &str) -> Result<(), ApiError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
