// Test Support
// In-memory device and console doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use board_sync::arbiter::ArbiterSettings;
use board_sync::core::{DiffState, ProjectConfig};
use board_sync::device::{
    ConnectParams, ConsoleLauncher, ConsoleSession, DeviceEntry, DeviceError, DeviceTransport, ListEntry, PortInfo,
};
use board_sync::utilities::{digest_bytes, paths};
use board_sync::App;

// FAKE TRANSPORT ------------------>>

#[derive(Default)]
struct DeviceFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl DeviceFs {
    fn dir_exists(&self, path: &str) -> bool {
        path == "/" || self.dirs.contains(path)
    }
}

type Fault = fn() -> DeviceError;

/// In-memory device with fault injection, call recording and overlap detection
#[derive(Default)]
pub struct FakeTransport {
    fs: Mutex<DeviceFs>,
    faults: Mutex<HashMap<&'static str, VecDeque<Fault>>>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    cancel_requested: AtomicBool,
}

struct CallGuard<'a>(&'a AtomicUsize);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call sleeps this long, which widens any overlap window
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let transport = Self::default();
        *transport.delay.lock() = delay;
        Arc::new(transport)
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        let mut fs = self.fs.lock();
        for dir in paths::parent_dirs(path) {
            fs.dirs.insert(dir);
        }
        fs.files.insert(path.to_string(), content.to_vec());
    }

    pub fn add_dir(&self, path: &str) {
        let mut fs = self.fs.lock();
        for dir in paths::parent_dirs(path) {
            fs.dirs.insert(dir);
        }
        fs.dirs.insert(path.to_string());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.fs.lock().files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.fs.lock().dir_exists(path)
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.fs.lock().files.keys().cloned().collect()
    }

    /// Make the next `op` call fail with `fault()`
    pub fn fail_next(&self, op: &'static str, fault: Fault) {
        self.faults.lock().entry(op).or_default().push_back(fault);
    }

    /// Recorded calls as "op path"
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, op: &str) -> usize {
        let prefix = format!("{} ", op);
        self.calls.lock().iter().filter(|c| c.starts_with(&prefix)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Highest number of calls ever in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: &'static str, path: &str) -> Result<CallGuard<'_>, DeviceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = CallGuard(&self.in_flight);
        self.calls.lock().push(format!("{} {}", op, path));

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.cancel_requested.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::Cancelled);
        }
        let fault = self.faults.lock().get_mut(op).and_then(|q| q.pop_front());
        if let Some(fault) = fault {
            return Err(fault());
        }
        Ok(guard)
    }
}

#[async_trait]
impl DeviceTransport for FakeTransport {
    async fn list(&self, path: &str) -> Result<Vec<ListEntry>, DeviceError> {
        let _call = self.enter("list", path).await?;
        let path = paths::normalize_path(path);
        let fs = self.fs.lock();
        if !fs.dir_exists(&path) {
            return Err(DeviceError::NotFound(path));
        }

        let dirs = fs.dirs.iter().map(|d| (d, true));
        let files = fs.files.keys().map(|f| (f, false));
        Ok(dirs
            .chain(files)
            .filter(|(p, _)| paths::device_parent(p) == path && p.as_str() != "/")
            .map(|(p, is_dir)| ListEntry {
                name: p.rsplit('/').next().unwrap_or_default().to_string(),
                is_dir,
            })
            .collect())
    }

    async fn stat_tree(&self, root: &str) -> Result<Vec<DeviceEntry>, DeviceError> {
        let _call = self.enter("stat_tree", root).await?;
        let root = paths::normalize_path(root);
        let fs = self.fs.lock();
        if !fs.dir_exists(&root) {
            return Err(DeviceError::NotFound(root));
        }

        let below = |p: &String| p != &root && paths::is_under_root(p, &root);
        let mut entries: Vec<DeviceEntry> = fs.dirs.iter().filter(|d| below(d)).map(DeviceEntry::dir).collect();
        entries.extend(
            fs.files
                .iter()
                .filter(|(p, _)| below(p))
                .map(|(p, content)| DeviceEntry::file(p.clone(), content.len() as u64)),
        );
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, DeviceError> {
        let _call = self.enter("read", path).await?;
        self.file(path).ok_or_else(|| DeviceError::NotFound(path.to_string()))
    }

    async fn write(&self, local: &Path, path: &str) -> Result<(), DeviceError> {
        let _call = self.enter("write", path).await?;
        let content = std::fs::read(local).map_err(|e| DeviceError::io(local, e))?;
        let mut fs = self.fs.lock();
        if !fs.dir_exists(&paths::device_parent(path)) {
            return Err(DeviceError::NotFound(paths::device_parent(path)));
        }
        fs.files.insert(path.to_string(), content);
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<(), DeviceError> {
        let _call = self.enter("mkdir", path).await?;
        let mut fs = self.fs.lock();
        if !fs.dir_exists(&paths::device_parent(path)) {
            return Err(DeviceError::NotFound(paths::device_parent(path)));
        }
        fs.dirs.insert(path.to_string());
        Ok(())
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<(), DeviceError> {
        let _call = self.enter("delete", path).await?;
        let mut fs = self.fs.lock();
        if fs.files.remove(path).is_some() {
            return Ok(());
        }
        if !fs.dirs.contains(path) {
            return Ok(());
        }

        let below = |p: &String| p != path && paths::is_under_root(p, path);
        let has_children = fs.files.keys().any(below) || fs.dirs.iter().any(below);
        if has_children && !recursive {
            return Err(DeviceError::Command {
                command: "rmdir".to_string(),
                message: format!("{} is not empty", path),
            });
        }
        fs.files.retain(|p, _| !below(p));
        fs.dirs.retain(|p| p != path && !below(p));
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, DeviceError> {
        let _call = self.enter("exists", path).await?;
        let fs = self.fs.lock();
        Ok(fs.files.contains_key(path) || fs.dir_exists(path))
    }

    async fn checksum(&self, path: &str) -> Result<Option<String>, DeviceError> {
        let _call = self.enter("checksum", path).await?;
        Ok(self.file(path).map(|content| digest_bytes(&content)))
    }

    async fn reset(&self) -> Result<(), DeviceError> {
        let _call = self.enter("reset", "/").await?;
        Ok(())
    }

    async fn list_ports(&self) -> Result<Vec<PortInfo>, DeviceError> {
        let _call = self.enter("list_ports", "").await?;
        Ok(vec![PortInfo {
            port: "/dev/ttyFAKE0".to_string(),
            description: "Fake board".to_string(),
        }])
    }

    fn cancel(&self) {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            self.cancel_requested.store(true, Ordering::SeqCst);
        }
    }
}

//--------------------------------------------------------<<
// FAKE CONSOLE ------------------>>

/// Console launcher that counts opens and closes
#[derive(Clone, Default)]
pub struct FakeConsole {
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<u8>>>,
}

impl FakeConsole {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<u8> {
        self.sent.lock().clone()
    }
}

struct FakeSession {
    open: bool,
    console: FakeConsole,
}

#[async_trait]
impl ConsoleSession for FakeSession {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        if self.open {
            self.open = false;
            self.console.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn send_raw(&mut self, bytes: &[u8], newline: bool) -> Result<(), DeviceError> {
        let mut sent = self.console.sent.lock();
        sent.extend_from_slice(bytes);
        if newline {
            sent.extend_from_slice(b"\r\n");
        }
        Ok(())
    }
}

#[async_trait]
impl ConsoleLauncher for FakeConsole {
    async fn open(&self, _params: &ConnectParams) -> Result<Box<dyn ConsoleSession>, DeviceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            open: true,
            console: self.clone(),
        }))
    }
}

//--------------------------------------------------------<<
// BUILDERS ------------------>>

/// Arbiter settings without any real waiting
pub fn fast_settings() -> ArbiterSettings {
    ArbiterSettings {
        auto_suspend: true,
        console_settle: Duration::ZERO,
        idle_delay: Duration::ZERO,
        handshake_attempts: 2,
        handshake_backoff: Duration::from_millis(1),
        handshake_path: "/".to_string(),
    }
}

/// Project config pointing at `root_path` with all delays at zero
pub fn fast_config(root_path: &str) -> ProjectConfig {
    let mut config = ProjectConfig {
        connect: "/dev/ttyFAKE0".to_string(),
        root_path: root_path.to_string(),
        idle_delay_ms: 0,
        ..ProjectConfig::default()
    };
    config.timing.console_settle_ms = 0;
    config.timing.handshake_backoff_ms = 1;
    config.timing.mkdir_retry_delay_ms = 1;
    config.timing.delete_verify_delay_ms = 1;
    config
}

/// App over `transport` for the workspace at `root`
pub fn app_with(root: &Path, config: ProjectConfig, transport: Arc<dyn DeviceTransport>) -> App {
    App::with_transport(root.to_path_buf(), config, transport, None, DiffState::new())
}

/// Write a workspace file, creating parents
pub fn write_local(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = paths::local_path(root, rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

//--------------------------------------------------------<<
