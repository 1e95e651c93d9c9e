// Sync Executor
// Runs a sync plan against the device, collecting per-item outcomes

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{SyncOperation, SyncPlan};
use crate::arbiter::{checkpoint, pause};
use crate::core::app_config::TimingDefaults;
use crate::device::DeviceTransport;
use crate::error::{Result, SyncError};
use crate::utilities::{paths, write_atomic};

/// Options for sync execution
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Attempts per directory creation
    pub mkdir_attempts: u32,
    /// Pause between directory creation attempts
    pub mkdir_retry_delay: Duration,
    /// Existence checks after a delete
    pub delete_verify_attempts: u32,
    /// Pause between delete verification checks
    pub delete_verify_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&TimingDefaults::default())
    }
}

impl From<&TimingDefaults> for SyncOptions {
    fn from(timing: &TimingDefaults) -> Self {
        Self {
            mkdir_attempts: timing.mkdir_attempts.max(1),
            mkdir_retry_delay: Duration::from_millis(timing.mkdir_retry_delay_ms),
            delete_verify_attempts: timing.delete_verify_attempts.max(1),
            delete_verify_delay: Duration::from_millis(timing.delete_verify_delay_ms),
        }
    }
}

/// One operation that did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    pub path: String,
    pub action: &'static str,
    pub error: String,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.action, self.path, self.error)
    }
}

/// Result of a sync batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Transfers and deletes that completed
    pub succeeded: usize,
    /// Directories created or confirmed on the device
    pub directories_created: usize,
    pub failures: Vec<OperationFailure>,
    /// Operations never attempted because the batch was cancelled
    pub skipped: usize,
    /// Post-sync problems that did not affect the transfer
    pub warnings: Vec<String>,
    pub cancelled: bool,
}

impl SyncReport {
    /// No failures and not cancelled
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    fn fail(&mut self, op: &SyncOperation, error: impl ToString) {
        let failure = OperationFailure {
            path: op.device_path().to_string(),
            action: op.action(),
            error: error.to_string(),
        };
        warn!(%failure, "sync operation failed");
        self.failures.push(failure);
    }
}

/// Per-item outcome. Fatal errors stop the batch.
enum Step {
    Done,
    Failed(String),
}

fn step(result: std::result::Result<(), SyncError>) -> Result<Step> {
    match result {
        Ok(()) => Ok(Step::Done),
        Err(SyncError::Device(e)) if e.is_fatal() => Err(SyncError::Device(e)),
        Err(e) => Ok(Step::Failed(e.to_string())),
    }
}

/// Executes plans one operation at a time
pub struct SyncExecutor {
    options: SyncOptions,
}

impl Default for SyncExecutor {
    fn default() -> Self {
        Self::new(SyncOptions::default())
    }
}

impl SyncExecutor {
    /// Create a new executor with the given options
    pub fn new(options: SyncOptions) -> Self {
        Self { options }
    }

    /// Run every operation of `plan`.
    ///
    /// Per-item failures are recorded in the report. Cancellation stops the
    /// batch and marks the rest as skipped, whether it arrives during a
    /// transport call or between them. A missing port is an error.
    pub async fn execute(&self, transport: &dyn DeviceTransport, plan: SyncPlan) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let total = plan.len();

        let (mkdirs, rest): (Vec<SyncOperation>, Vec<SyncOperation>) = plan
            .operations
            .into_iter()
            .partition(|op| matches!(op, SyncOperation::MkDir { .. }));

        let mut created = Vec::new();
        let mut failed_dirs = BTreeSet::new();

        for (index, op) in mkdirs.iter().enumerate() {
            if let Err(e) = checkpoint() {
                return self.stop(e.into(), report, total - index);
            }
            match self.run_mkdir(transport, op.device_path()).await {
                Ok(Step::Done) => created.push(op.device_path().to_string()),
                Ok(Step::Failed(error)) => {
                    failed_dirs.insert(op.device_path().to_string());
                    report.fail(op, error);
                }
                Err(e) => return self.stop(e, report, total - index),
            }
        }

        // Some boards acknowledge a mkdir before the entry is visible
        for dir in &created {
            if let Err(e) = checkpoint() {
                return self.stop(e.into(), report, rest.len());
            }
            match self.verify_dir(transport, dir).await {
                Ok(Step::Done) => report.directories_created += 1,
                Ok(Step::Failed(error)) => {
                    failed_dirs.insert(dir.clone());
                    report.fail(&SyncOperation::MkDir { path: dir.clone() }, error);
                }
                Err(e) => return self.stop(e, report, rest.len()),
            }
        }

        let remaining = rest.len();
        for (index, op) in rest.into_iter().enumerate() {
            if let Err(e) = checkpoint() {
                return self.stop(e.into(), report, remaining - index);
            }
            if let SyncOperation::Upload { device, .. } = &op {
                if let Some(dir) = failed_dirs.iter().find(|d| paths::is_under_root(device, d)) {
                    report.fail(&op, format!("parent directory {} could not be created", dir));
                    continue;
                }
            }

            debug!(action = op.action(), path = op.device_path(), "sync operation");
            match self.run(transport, &op).await {
                Ok(Step::Done) => report.succeeded += 1,
                Ok(Step::Failed(error)) => report.fail(&op, error),
                Err(e) => return self.stop(e, report, remaining - index),
            }
        }

        info!(
            succeeded = report.succeeded,
            directories = report.directories_created,
            failed = report.failures.len(),
            "sync batch finished"
        );

        Ok(report)
    }

    /// Cancellation ends the batch with a partial report; anything else fatal
    /// is returned as an error
    fn stop(&self, error: SyncError, mut report: SyncReport, remaining: usize) -> Result<SyncReport> {
        if error.is_cancelled() {
            report.cancelled = true;
            report.skipped = remaining;
            info!(skipped = remaining, "sync batch cancelled");
            Ok(report)
        } else {
            Err(error)
        }
    }

    async fn run_mkdir(&self, transport: &dyn DeviceTransport, path: &str) -> Result<Step> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match transport.mkdir(path).await {
                Ok(()) => return Ok(Step::Done),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) if attempt < self.options.mkdir_attempts => {
                    debug!(path, attempt, error = %e, "mkdir failed, retrying");
                    pause(self.options.mkdir_retry_delay).await?;
                }
                Err(e) => return Ok(Step::Failed(e.to_string())),
            }
        }
    }

    async fn verify_dir(&self, transport: &dyn DeviceTransport, path: &str) -> Result<Step> {
        match transport.exists(path).await {
            Ok(true) => return Ok(Step::Done),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Ok(false) | Err(_) => {}
        }

        debug!(path, "directory missing after mkdir, creating again");
        match transport.mkdir(path).await {
            Ok(()) => Ok(Step::Done),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => Ok(Step::Failed(e.to_string())),
        }
    }

    async fn run(&self, transport: &dyn DeviceTransport, op: &SyncOperation) -> Result<Step> {
        match op {
            SyncOperation::MkDir { path } => self.run_mkdir(transport, path).await,
            SyncOperation::Upload { local, device } => {
                step(transport.write(local, device).await.map_err(SyncError::from))
            }
            SyncOperation::Download { device, local } => {
                let bytes = match transport.read(device).await {
                    Ok(bytes) => bytes,
                    Err(e) => return step(Err(e.into())),
                };
                step(write_local(local.clone(), bytes).await)
            }
            SyncOperation::Delete { device, is_dir } => {
                if let Err(e) = transport.delete(device, *is_dir).await {
                    return step(Err(e.into()));
                }
                self.verify_deleted(transport, device).await
            }
        }
    }

    async fn verify_deleted(&self, transport: &dyn DeviceTransport, path: &str) -> Result<Step> {
        for attempt in 1..=self.options.delete_verify_attempts {
            match transport.exists(path).await {
                Ok(false) => return Ok(Step::Done),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Ok(true) => debug!(path, attempt, "still present after delete"),
                Err(e) => debug!(path, attempt, error = %e, "delete verification failed"),
            }
            if attempt < self.options.delete_verify_attempts {
                pause(self.options.delete_verify_delay).await?;
            }
        }
        Ok(Step::Failed("still present after delete".to_string()))
    }
}

async fn write_local(path: PathBuf, bytes: Vec<u8>) -> std::result::Result<(), SyncError> {
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
        .await
        .map_err(|e| SyncError::TaskAborted(e.to_string()))?
}
