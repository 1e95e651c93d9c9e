// Application State
// Workspace, configuration and every device operation, routed through the arbiter

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::project_config::{ProjectConfig, TransportKind, PROJECT_CONFIG_NAME};
use super::DiffState;
use crate::arbiter::{Arbiter, ArbiterSettings, TaskOptions};
use crate::device::{
    normalize_connect, ConnectParams, ConsoleLauncher, DeviceEntry, DeviceError, DeviceTransport, ListEntry,
    MountedTransport, MpremoteSettings, MpremoteTransport, PortInfo, ProcessConsoleLauncher,
};
use crate::error::{Result, SyncError};
use crate::operations::{
    manifest::MANIFEST_FILE, plan_baseline_pull, plan_baseline_push, plan_delete, plan_mkdir, plan_pull,
    plan_push, plan_wipe, DiffEngine, DiffResult, Manifest, ManifestDelta, OperationFailure, SyncExecutor,
    SyncOperation, SyncOptions, SyncPlan, SyncReport,
};
use crate::utilities::{ensure_default_rules, paths, IgnoreMatcher, METADATA_DIR};

/// Environment variable that overrides workspace detection
pub const WORKSPACE_ENV: &str = "BOARD_SYNC_WORKSPACE";

/// What `init` created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitOutcome {
    pub created_rules: bool,
    pub created_config: bool,
}

/// Main application state
pub struct App {
    /// Workspace root path
    pub workspace_root: PathBuf,

    /// Project configuration (loaded from board-sync.yaml)
    pub config: ProjectConfig,

    arbiter: Arbiter,
    diff_state: DiffState,
}

impl App {
    /// Open the workspace and build the configured transport.
    ///
    /// `workspace` and `port` override detection and the configured port.
    pub fn open(workspace: Option<PathBuf>, port: Option<String>) -> anyhow::Result<Self> {
        let workspace_root = match workspace {
            Some(path) => path,
            None => Self::detect_workspace_root()?,
        };
        if !workspace_root.is_dir() {
            return Err(SyncError::NoWorkspace(workspace_root).into());
        }

        let mut config = ProjectConfig::load_from_workspace(&workspace_root)?;
        if let Some(port) = port {
            config.connect = port;
        }

        let transport: Arc<dyn DeviceTransport> = match config.transport {
            TransportKind::Mpremote => Arc::new(MpremoteTransport::new(MpremoteSettings {
                program: config.mpremote_program.clone(),
                connect: config.connect.clone(),
                timeout: config.command_timeout(),
                retries: config.timing.command_retries,
            })),
            TransportKind::Mounted => {
                let mount_point = config
                    .mount_point
                    .clone()
                    .context("transport 'mounted' requires mount_point")?;
                Arc::new(MountedTransport::new(mount_point))
            }
        };
        let launcher: Arc<dyn ConsoleLauncher> =
            Arc::new(ProcessConsoleLauncher::new(config.console_python.clone()));

        debug!(root = %workspace_root.display(), transport = ?config.transport, "workspace opened");
        Ok(Self::with_transport(
            workspace_root,
            config,
            transport,
            Some(launcher),
            DiffState::new(),
        ))
    }

    /// Build an app around an existing transport. Must be called inside a
    /// tokio runtime.
    pub fn with_transport(
        workspace_root: PathBuf,
        config: ProjectConfig,
        transport: Arc<dyn DeviceTransport>,
        launcher: Option<Arc<dyn ConsoleLauncher>>,
        diff_state: DiffState,
    ) -> Self {
        let settings = ArbiterSettings::from_timing(
            &config.timing_defaults(),
            config.auto_suspend,
            config.root_path.clone(),
        );
        let arbiter = match launcher {
            Some(launcher) => Arbiter::with_console(transport, launcher, settings),
            None => Arbiter::new(transport, settings),
        };

        Self {
            workspace_root,
            config,
            arbiter,
            diff_state,
        }
    }

    /// Detect the workspace root directory
    pub fn detect_workspace_root() -> anyhow::Result<PathBuf> {
        // First try environment variable
        if let Ok(path) = std::env::var(WORKSPACE_ENV) {
            let path = PathBuf::from(path);
            if path.is_dir() {
                return Ok(path);
            }
        }

        let cwd = std::env::current_dir().context("Failed to read current directory")?;

        // Walk up looking for board-sync.yaml
        let mut current = Some(cwd.as_path());
        while let Some(dir) = current {
            if dir.join(PROJECT_CONFIG_NAME).is_file() {
                return Ok(dir.to_path_buf());
            }
            current = dir.parent();
        }

        // Fall back to current directory
        Ok(cwd)
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    pub fn diff_state(&self) -> &DiffState {
        &self.diff_state
    }

    pub fn device_root(&self) -> &str {
        &self.config.root_path
    }

    pub fn manifest_path(&self) -> PathBuf {
        Manifest::path_for(&self.workspace_root)
    }

    /// Create the metadata directory, default ignore rules and the project config
    pub fn init(&self) -> anyhow::Result<InitOutcome> {
        let created_rules = ensure_default_rules(&self.workspace_root)?;

        let config_path = self.workspace_root.join(PROJECT_CONFIG_NAME);
        let created_config = if config_path.exists() {
            false
        } else {
            self.config.save(&config_path)?;
            true
        };

        info!(created_rules, created_config, "workspace initialized");
        Ok(InitOutcome {
            created_rules,
            created_config,
        })
    }

    /// Write the default ignore rules on first use. Failure only warns; the
    /// built-in defaults still apply.
    fn ensure_rules(&self) {
        match ensure_default_rules(&self.workspace_root) {
            Ok(true) => info!(root = %self.workspace_root.display(), "default ignore rules created"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "could not write default ignore rules"),
        }
    }

    /// Effective ignore rules for the workspace
    pub fn ignore_matcher(&self) -> Result<IgnoreMatcher> {
        IgnoreMatcher::load(&self.workspace_root, &self.config.excludes)
    }

    /// Snapshot the workspace on the blocking pool
    pub async fn build_manifest(&self) -> Result<Manifest> {
        let root = self.workspace_root.clone();
        let ignore = self.ignore_matcher()?;
        tokio::task::spawn_blocking(move || Manifest::build(&root, &ignore))
            .await
            .map_err(|e| SyncError::TaskAborted(e.to_string()))?
    }

    /// Local changes since the last saved manifest. Never touches the device.
    pub async fn local_status(&self) -> Result<ManifestDelta> {
        let current = self.build_manifest().await?;
        let previous = Manifest::load(&self.manifest_path())?;

        Ok(match previous {
            Some(previous) => current.changes_since(&previous),
            None => ManifestDelta {
                changed_or_new: current.files.keys().cloned().collect(),
                deleted: Vec::new(),
            },
        })
    }

    /// Compare the workspace with the device and remember the result
    pub async fn check_diffs(&self) -> Result<DiffResult> {
        self.ensure_rules();
        let manifest = self.build_manifest().await?;
        let engine = DiffEngine::new(
            self.ignore_matcher()?,
            self.config.root_path.clone(),
            self.config.compare_mode()?,
        );

        let diff = self
            .arbiter
            .run(TaskOptions::default(), move |transport| async move {
                let entries = stat_tree_or_empty(transport.as_ref(), engine.device_root()).await?;
                engine.diff(&manifest, &entries, transport.as_ref()).await
            })
            .await?;

        self.diff_state.set(diff.clone());
        Ok(diff)
    }

    /// Last diff, or a fresh one when none is stored
    async fn current_diff(&self) -> Result<DiffResult> {
        match self.diff_state.get() {
            Some(diff) => Ok(diff),
            None => self.check_diffs().await,
        }
    }

    /// Operations a push would run
    pub async fn preview_push(&self, prune: Option<bool>) -> Result<SyncPlan> {
        let diff = self.current_diff().await?;
        let prune = prune.unwrap_or(self.config.prune_on_push);
        Ok(plan_push(&diff, &self.workspace_root, &self.config.root_path, prune))
    }

    /// Operations a pull would run
    pub async fn preview_pull(&self) -> Result<SyncPlan> {
        let diff = self.current_diff().await?;
        Ok(plan_pull(&diff, &self.workspace_root, &self.config.root_path))
    }

    /// Upload changed and local-only files, optionally deleting device-only ones
    pub async fn sync_diffs_to_device(&self, prune: Option<bool>) -> Result<SyncReport> {
        let plan = self.preview_push(prune).await?;
        let manifest = self.build_manifest().await?;
        self.push_plan(manifest, plan).await
    }

    /// Download changed and device-only files
    pub async fn sync_diffs_from_device(&self) -> Result<SyncReport> {
        let plan = self.preview_pull().await?;
        self.pull_plan(plan).await
    }

    /// Upload every non-ignored local file
    pub async fn sync_all_to_device(&self) -> Result<SyncReport> {
        self.ensure_rules();
        let manifest = self.build_manifest().await?;
        let plan = plan_baseline_push(&manifest, &self.workspace_root, &self.config.root_path);
        self.push_plan(manifest, plan).await
    }

    /// Download every non-ignored device file
    pub async fn sync_all_from_device(&self) -> Result<SyncReport> {
        self.ensure_rules();
        let ignore = self.ignore_matcher()?;
        let root = self.config.root_path.clone();
        let local_root = self.workspace_root.clone();
        let options = self.sync_options();

        let mut report = self
            .arbiter
            .run(TaskOptions::default(), move |transport| async move {
                let entries = stat_tree_or_empty(transport.as_ref(), &root).await?;
                let plan = plan_baseline_pull(&entries, &ignore, &local_root, &root);
                SyncExecutor::new(options).execute(transport.as_ref(), plan).await
            })
            .await?;

        self.after_pull(&mut report).await;
        Ok(report)
    }

    /// Upload one local file, creating its parent directories
    pub async fn upload_file(&self, local: &Path) -> Result<SyncReport> {
        let local = if local.is_absolute() {
            local.to_path_buf()
        } else {
            self.workspace_root.join(local)
        };
        let rel = paths::relative_key(&self.workspace_root, &local).ok_or_else(|| {
            SyncError::Config(format!("{} is outside the workspace", local.display()))
        })?;
        if self.ignore_matcher()?.matches(&rel, false) {
            warn!(path = %rel, "uploading a file matched by ignore rules");
        }

        let mut single = DiffResult::default();
        single
            .local_only
            .insert(paths::to_device_path(&rel, &self.config.root_path));
        let plan = plan_push(&single, &self.workspace_root, &self.config.root_path, false);

        let options = self.sync_options();
        let report = self
            .arbiter
            .run(TaskOptions::default(), move |transport| async move {
                SyncExecutor::new(options).execute(transport.as_ref(), plan).await
            })
            .await?;

        if report.is_complete() {
            self.diff_state.clear();
        }
        Ok(report)
    }

    /// Delete a device file or directory tree
    pub async fn delete(&self, device_path: &str) -> Result<SyncReport> {
        let target = self.device_target(device_path);
        let options = self.sync_options();

        let report = self
            .arbiter
            .run(TaskOptions::default(), move |transport| async move {
                if !transport.exists(&target).await? {
                    return Err(DeviceError::NotFound(target).into());
                }

                let plan = match transport.stat_tree(&target).await {
                    Ok(subtree) => plan_delete(&DeviceEntry::dir(target.as_str()), &subtree),
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    // Listing a file fails; delete it on its own
                    Err(_) => plan_delete(&DeviceEntry::file(target.as_str(), 0), &[]),
                };
                let report = SyncExecutor::new(options).execute(transport.as_ref(), plan).await?;
                Ok::<_, SyncError>(report)
            })
            .await?;

        self.diff_state.clear();
        Ok(report)
    }

    /// Delete a device path and its copy in the workspace.
    ///
    /// The local copy is only removed once the device side is gone. A path
    /// already missing on the device still has its local copy removed.
    pub async fn delete_both(&self, device_path: &str) -> Result<SyncReport> {
        let target = self.device_target(device_path);
        let local = self.local_target(&target)?;

        let mut report = match self.delete(&target).await {
            Ok(report) => report,
            Err(SyncError::Device(DeviceError::NotFound(_))) => SyncReport::default(),
            Err(e) => return Err(e),
        };
        if !report.is_complete() {
            return Ok(report);
        }

        match remove_local(local.clone()).await {
            Ok(true) => report.succeeded += 1,
            Ok(false) => debug!(path = %local.display(), "no local copy to delete"),
            Err(e) => report.failures.push(OperationFailure {
                path: local.display().to_string(),
                action: "delete local",
                error: e.to_string(),
            }),
        }
        self.diff_state.clear();
        Ok(report)
    }

    /// Create a device directory and any missing parents
    pub async fn mkdir(&self, device_path: &str) -> Result<SyncReport> {
        let plan = plan_mkdir(&self.device_target(device_path));
        let options = self.sync_options();

        let report = self
            .arbiter
            .run(TaskOptions::default(), move |transport| async move {
                SyncExecutor::new(options).execute(transport.as_ref(), plan).await
            })
            .await?;

        self.diff_state.clear();
        Ok(report)
    }

    /// Download one device file into the workspace. The saved manifest is
    /// left alone.
    pub async fn download_file(&self, device_path: &str) -> Result<SyncReport> {
        let device = self.device_target(device_path);
        let local = self.local_target(&device)?;
        let plan = SyncPlan {
            operations: vec![SyncOperation::Download { device, local }],
        };
        let options = self.sync_options();

        let report = self
            .arbiter
            .run(TaskOptions::default(), move |transport| async move {
                SyncExecutor::new(options).execute(transport.as_ref(), plan).await
            })
            .await?;

        if report.is_complete() {
            self.diff_state.clear();
        }
        Ok(report)
    }

    /// Delete everything under the device root. The root itself stays.
    pub async fn wipe(&self) -> Result<SyncReport> {
        let root = self.config.root_path.clone();
        let options = self.sync_options();

        let report = self
            .arbiter
            .run(TaskOptions::default(), move |transport| async move {
                let entries = stat_tree_or_empty(transport.as_ref(), &root).await?;
                let plan = plan_wipe(&entries, &root);
                SyncExecutor::new(options).execute(transport.as_ref(), plan).await
            })
            .await?;

        self.diff_state.clear();
        Ok(report)
    }

    /// Run a local script on the board and return what it printed
    pub async fn run_file(&self, local: &Path) -> Result<String> {
        let local = local.to_path_buf();
        self.arbiter
            .run(TaskOptions::default(), move |transport| async move {
                transport.run_file(&local).await.map_err(SyncError::from)
            })
            .await
    }

    /// List one device directory (the root when `path` is `None`)
    pub async fn list(&self, path: Option<&str>) -> Result<Vec<ListEntry>> {
        let path = path
            .map(paths::normalize_path)
            .unwrap_or_else(|| self.config.root_path.clone());
        self.arbiter
            .run(TaskOptions::default(), move |transport| async move {
                transport.list(&path).await.map_err(SyncError::from)
            })
            .await
    }

    /// Serial ports mpremote can see
    pub async fn list_ports(&self) -> Result<Vec<PortInfo>> {
        self.arbiter
            .run(TaskOptions::default().skip_idle(), |transport| async move {
                transport.list_ports().await.map_err(SyncError::from)
            })
            .await
    }

    /// Reset the board. A soft reset only restarts the interpreter.
    pub async fn reset(&self, soft: bool) -> Result<()> {
        self.arbiter
            .run(TaskOptions::default().skip_idle(), move |transport| async move {
                let result = if soft {
                    transport.soft_reset().await
                } else {
                    transport.reset().await
                };
                result.map_err(SyncError::from)
            })
            .await
    }

    /// Stop the program running on the board
    pub async fn interrupt(&self) -> Result<()> {
        self.arbiter
            .run(TaskOptions::default().skip_idle(), |transport| async move {
                transport.interrupt().await.map_err(SyncError::from)
            })
            .await
    }

    /// Save `port` as `connect` in board-sync.yaml.
    ///
    /// Only the port changes on disk; a `--port` override is not persisted.
    /// The running transport keeps its old port, so reopen the app to use it.
    pub fn set_port(&mut self, port: &str) -> anyhow::Result<()> {
        if normalize_connect(port).is_none() {
            return Err(SyncError::Device(DeviceError::NoPortSelected).into());
        }

        let config_path = self.workspace_root.join(PROJECT_CONFIG_NAME);
        let mut saved = ProjectConfig::load_from_workspace(&self.workspace_root)?;
        saved.connect = port.to_string();
        saved.save(&config_path)?;

        self.config.connect = port.to_string();
        info!(port, path = %config_path.display(), "port saved");
        Ok(())
    }

    /// Connect parameters for the configured port
    pub fn connect_params(&self) -> Result<ConnectParams> {
        let port = normalize_connect(&self.config.connect).ok_or(DeviceError::NoPortSelected)?;
        Ok(ConnectParams { port })
    }

    /// Open the interactive console on the configured port
    pub async fn open_console(&self) -> Result<()> {
        let params = self.connect_params()?;
        self.arbiter.open_console(params).await
    }

    /// Absolute device path for user input. Relative paths start at the device root.
    fn device_target(&self, path: &str) -> String {
        if path.starts_with('/') {
            paths::normalize_path(path)
        } else {
            paths::to_device_path(path, &self.config.root_path)
        }
    }

    /// Workspace path mirroring a device path below the root
    fn local_target(&self, device: &str) -> Result<PathBuf> {
        let root = &self.config.root_path;
        let rel = paths::to_local_relative(device, root);
        if !paths::is_under_root(device, root) || rel.is_empty() {
            return Err(SyncError::Config(format!(
                "{} has no workspace counterpart under device root {}",
                device, root
            )));
        }
        Ok(paths::local_path(&self.workspace_root, &rel))
    }

    fn sync_options(&self) -> SyncOptions {
        SyncOptions::from(&self.config.timing_defaults())
    }

    /// Execute `plan`, then save and mirror `manifest` once it fully succeeded
    async fn push_plan(&self, manifest: Manifest, plan: SyncPlan) -> Result<SyncReport> {
        let manifest_path = self.manifest_path();
        let root = self.config.root_path.clone();
        let options = self.sync_options();

        let report = self
            .arbiter
            .run(TaskOptions::default(), move |transport| async move {
                let mut report = SyncExecutor::new(options).execute(transport.as_ref(), plan).await?;
                if report.is_complete() {
                    if let Err(e) = save_manifest(manifest, manifest_path.clone()).await {
                        report.warnings.push(format!("manifest not saved: {}", e));
                    } else if let Err(e) = mirror_manifest(transport.as_ref(), &manifest_path, &root).await {
                        report.warnings.push(format!("manifest not mirrored to device: {}", e));
                    }
                }
                Ok::<_, SyncError>(report)
            })
            .await?;

        if report.is_complete() {
            self.diff_state.clear();
        }
        Ok(report)
    }

    async fn pull_plan(&self, plan: SyncPlan) -> Result<SyncReport> {
        let options = self.sync_options();
        let mut report = self
            .arbiter
            .run(TaskOptions::default(), move |transport| async move {
                SyncExecutor::new(options).execute(transport.as_ref(), plan).await
            })
            .await?;

        self.after_pull(&mut report).await;
        Ok(report)
    }

    /// Record the new local baseline once a pull fully succeeded
    async fn after_pull(&self, report: &mut SyncReport) {
        if !report.is_complete() {
            return;
        }
        self.diff_state.clear();

        let saved = match self.build_manifest().await {
            Ok(manifest) => save_manifest(manifest, self.manifest_path()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            report.warnings.push(format!("manifest not saved: {}", e));
        }
    }
}

/// Remove a local file or tree. `Ok(false)` when nothing was there.
async fn remove_local(path: PathBuf) -> std::io::Result<bool> {
    tokio::task::spawn_blocking(move || {
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match removed {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Recursive listing where a missing root counts as empty
async fn stat_tree_or_empty(transport: &dyn DeviceTransport, root: &str) -> Result<Vec<DeviceEntry>> {
    match transport.stat_tree(root).await {
        Ok(entries) => Ok(entries),
        Err(DeviceError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

async fn save_manifest(manifest: Manifest, path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || manifest.save(&path))
        .await
        .map_err(|e| SyncError::TaskAborted(e.to_string()))?
}

/// Copy the saved manifest to `<root>/.board-sync/manifest.json` on the device
async fn mirror_manifest(transport: &dyn DeviceTransport, local: &Path, device_root: &str) -> Result<()> {
    let dir = paths::join_device(device_root, METADATA_DIR);
    transport.mkdir(&dir).await?;
    transport
        .write(local, &paths::join_device(&dir, MANIFEST_FILE))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn fast_config() -> ProjectConfig {
        let mut config = ProjectConfig {
            idle_delay_ms: 0,
            ..ProjectConfig::default()
        };
        config.timing.console_settle_ms = 0;
        config.timing.handshake_backoff_ms = 0;
        config.timing.mkdir_retry_delay_ms = 0;
        config.timing.delete_verify_delay_ms = 0;
        config
    }

    fn app(local: &Path, device: &Path) -> App {
        App::with_transport(
            local.to_path_buf(),
            fast_config(),
            Arc::new(MountedTransport::new(device)),
            None,
            DiffState::new(),
        )
    }

    #[tokio::test]
    async fn test_push_then_diff_is_empty() {
        let local = tempfile::tempdir().unwrap();
        let device = tempfile::tempdir().unwrap();
        fs::create_dir_all(local.path().join("lib")).unwrap();
        fs::write(local.path().join("main.py"), b"import lib.util").unwrap();
        fs::write(local.path().join("lib/util.py"), b"x = 1").unwrap();

        let app = app(local.path(), device.path());
        let report = app.sync_diffs_to_device(None).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.succeeded, 2);
        assert!(!app.diff_state().is_set());

        // Manifest saved locally and mirrored
        assert!(app.manifest_path().exists());
        assert!(device.path().join(".board-sync/manifest.json").exists());

        let diff = app.check_diffs().await.unwrap();
        assert!(diff.is_empty(), "{:?}", diff);
    }

    #[tokio::test]
    async fn test_pull_never_removes_local_files() {
        let local = tempfile::tempdir().unwrap();
        let device = tempfile::tempdir().unwrap();
        fs::write(local.path().join("only_here.py"), b"l").unwrap();
        fs::write(device.path().join("boot.py"), b"b").unwrap();

        let app = app(local.path(), device.path());
        let report = app.sync_diffs_from_device().await.unwrap();
        assert!(report.is_complete());
        assert!(local.path().join("only_here.py").exists());
        assert_eq!(fs::read(local.path().join("boot.py")).unwrap(), b"b");
    }

    #[tokio::test]
    async fn test_delete_directory_tree() {
        let local = tempfile::tempdir().unwrap();
        let device = tempfile::tempdir().unwrap();
        fs::create_dir_all(device.path().join("lib/net")).unwrap();
        fs::write(device.path().join("lib/net/wifi.py"), b"w").unwrap();
        fs::write(device.path().join("keep.py"), b"k").unwrap();

        let app = app(local.path(), device.path());
        let report = app.delete("/lib").await.unwrap();
        assert!(report.is_complete());
        assert!(!device.path().join("lib").exists());
        assert!(device.path().join("keep.py").exists());

        assert!(matches!(
            app.delete("/nope.py").await,
            Err(SyncError::Device(DeviceError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_mkdir_creates_missing_parents() {
        let local = tempfile::tempdir().unwrap();
        let device = tempfile::tempdir().unwrap();

        let app = app(local.path(), device.path());
        let report = app.mkdir("lib/net").await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.directories_created, 2);
        assert!(device.path().join("lib/net").is_dir());
    }

    #[tokio::test]
    async fn test_download_single_file() {
        let local = tempfile::tempdir().unwrap();
        let device = tempfile::tempdir().unwrap();
        fs::create_dir_all(device.path().join("lib")).unwrap();
        fs::write(device.path().join("lib/sensor.py"), b"READ = 1").unwrap();
        fs::write(device.path().join("boot.py"), b"b").unwrap();

        let app = app(local.path(), device.path());
        let report = app.download_file("/lib/sensor.py").await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.succeeded, 1);
        assert_eq!(fs::read(local.path().join("lib/sensor.py")).unwrap(), b"READ = 1");
        assert!(!local.path().join("boot.py").exists());
        assert!(!app.manifest_path().exists());

        let missing = app.download_file("/gone.py").await.unwrap();
        assert_eq!(missing.failures.len(), 1);
        assert!(!local.path().join("gone.py").exists());
    }

    #[tokio::test]
    async fn test_delete_both_removes_local_copy() {
        let local = tempfile::tempdir().unwrap();
        let device = tempfile::tempdir().unwrap();
        fs::create_dir_all(device.path().join("lib")).unwrap();
        fs::write(device.path().join("lib/a.py"), b"a").unwrap();
        fs::create_dir_all(local.path().join("lib")).unwrap();
        fs::write(local.path().join("lib/a.py"), b"a").unwrap();
        fs::write(local.path().join("only_local.py"), b"l").unwrap();

        let app = app(local.path(), device.path());
        let report = app.delete_both("/lib/a.py").await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.succeeded, 2);
        assert!(!device.path().join("lib/a.py").exists());
        assert!(!local.path().join("lib/a.py").exists());

        // Already gone from the board
        let report = app.delete_both("only_local.py").await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(!local.path().join("only_local.py").exists());

        assert!(matches!(app.delete_both("/").await, Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn test_set_port_persists_connect_only() {
        let local = tempfile::tempdir().unwrap();
        let device = tempfile::tempdir().unwrap();
        let mut app = app(local.path(), device.path());

        app.set_port("/dev/ttyUSB3").unwrap();
        assert_eq!(app.config.connect, "/dev/ttyUSB3");
        let saved = ProjectConfig::load_from_workspace(local.path()).unwrap();
        assert_eq!(saved.connect, "/dev/ttyUSB3");
        assert_eq!(saved.root_path, ProjectConfig::default().root_path);

        let err = app.set_port("auto").unwrap_err();
        assert!(err.downcast_ref::<SyncError>().is_some_and(|e| e.is_precondition()));
        assert_eq!(
            ProjectConfig::load_from_workspace(local.path()).unwrap().connect,
            "/dev/ttyUSB3"
        );
    }

    #[tokio::test]
    async fn test_local_status_against_saved_manifest() {
        let local = tempfile::tempdir().unwrap();
        let device = tempfile::tempdir().unwrap();
        fs::write(local.path().join("a.py"), b"a").unwrap();

        let app = app(local.path(), device.path());
        let delta = app.local_status().await.unwrap();
        assert_eq!(delta.changed_or_new, vec!["a.py"]);

        app.sync_all_to_device().await.unwrap();
        assert!(app.local_status().await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(5)).await;
        fs::write(local.path().join("b.py"), b"b").unwrap();
        assert_eq!(app.local_status().await.unwrap().changed_or_new, vec!["b.py"]);
    }

    #[tokio::test]
    async fn test_upload_outside_workspace_is_rejected() {
        let local = tempfile::tempdir().unwrap();
        let device = tempfile::tempdir().unwrap();
        let app = app(local.path(), device.path());
        assert!(matches!(
            app.upload_file(Path::new("/definitely/elsewhere.py")).await,
            Err(SyncError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_auto_connect_has_no_console_params() {
        let local = tempfile::tempdir().unwrap();
        let device = tempfile::tempdir().unwrap();
        let mut app = app(local.path(), device.path());

        app.config.connect = "auto".to_string();
        let err = app.connect_params().unwrap_err();
        assert!(err.is_precondition());

        app.config.connect = "serial:///dev/ttyACM0".to_string();
        assert_eq!(app.connect_params().unwrap().port, "/dev/ttyACM0");
    }
}
