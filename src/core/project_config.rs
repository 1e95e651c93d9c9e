// Project Configuration
// Per-workspace settings loaded from board-sync.yaml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::app_config::{AppConfig, TimingDefaults};
use crate::error::SyncError;
use crate::operations::CompareMode;

/// Project config file name at the workspace root
pub const PROJECT_CONFIG_NAME: &str = "board-sync.yaml";

/// How the device filesystem is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Mpremote,
    Mounted,
}

impl TransportKind {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("mounted") {
            Self::Mounted
        } else {
            Self::Mpremote
        }
    }
}

/// Project-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Serial port, `serial://` prefixes allowed, or "auto" for none
    pub connect: String,

    /// Device directory the workspace maps onto
    pub root_path: String,

    /// Close and reopen the console around device operations
    pub auto_suspend: bool,

    /// Pause before device listings
    pub idle_delay_ms: u64,

    pub transport: TransportKind,

    /// Host directory of the device filesystem for the mounted transport
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<PathBuf>,

    pub mpremote_program: String,

    /// Host python with pyserial for the console
    pub console_python: String,

    /// "checksum" or "size"
    pub compare: String,

    /// Delete device-only files on push
    pub prune_on_push: bool,

    pub timing: TimingConfig,

    /// Extra ignore rules on top of the rule files
    pub excludes: Vec<String>,
}

/// Timeouts, retries and delays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub command_timeout_ms: u64,
    pub command_retries: u32,
    pub console_settle_ms: u64,
    pub handshake_attempts: u32,
    pub handshake_backoff_ms: u64,
    pub mkdir_attempts: u32,
    pub mkdir_retry_delay_ms: u64,
    pub delete_verify_attempts: u32,
    pub delete_verify_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        let timing = TimingDefaults::default();
        Self {
            command_timeout_ms: timing.command_timeout_ms,
            command_retries: timing.command_retries,
            console_settle_ms: timing.console_settle_ms,
            handshake_attempts: timing.handshake_attempts,
            handshake_backoff_ms: timing.handshake_backoff_ms,
            mkdir_attempts: timing.mkdir_attempts,
            mkdir_retry_delay_ms: timing.mkdir_retry_delay_ms,
            delete_verify_attempts: timing.delete_verify_attempts,
            delete_verify_delay_ms: timing.delete_verify_delay_ms,
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        let defaults = AppConfig::default();
        Self {
            connect: defaults.device.connect,
            root_path: defaults.device.root_path,
            auto_suspend: defaults.device.auto_suspend,
            idle_delay_ms: defaults.timing.idle_delay_ms,
            transport: TransportKind::parse(&defaults.device.transport),
            mount_point: None,
            mpremote_program: defaults.device.mpremote_program,
            console_python: defaults.device.console_python,
            compare: defaults.sync.compare,
            prune_on_push: defaults.sync.prune_on_push,
            timing: TimingConfig::default(),
            excludes: Vec::new(),
        }
    }
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read project config: {}", path.display()))?;

        let config: ProjectConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse project config YAML: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid project config: {}", path.display()))?;

        Ok(config)
    }

    /// Load from a workspace root, falling back to defaults when the file is absent
    pub fn load_from_workspace(workspace_root: &Path) -> Result<Self> {
        let config_path = workspace_root.join(PROJECT_CONFIG_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save project configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize project config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write project config: {}", path.display()))?;

        Ok(())
    }

    /// Reject values the sync core cannot work with
    pub fn validate(&self) -> crate::error::Result<()> {
        if !self.root_path.starts_with('/') {
            return Err(SyncError::Config(format!(
                "root_path must be absolute, got '{}'",
                self.root_path
            )));
        }

        let attempts = [
            ("timing.handshake_attempts", self.timing.handshake_attempts),
            ("timing.mkdir_attempts", self.timing.mkdir_attempts),
            ("timing.delete_verify_attempts", self.timing.delete_verify_attempts),
        ];
        if let Some((name, _)) = attempts.iter().find(|(_, value)| *value == 0) {
            return Err(SyncError::Config(format!("{} must be at least 1", name)));
        }

        if self.transport == TransportKind::Mounted && self.mount_point.is_none() {
            return Err(SyncError::Config(
                "transport 'mounted' requires mount_point".to_string(),
            ));
        }

        self.compare_mode()?;
        Ok(())
    }

    pub fn compare_mode(&self) -> crate::error::Result<CompareMode> {
        self.compare.parse()
    }

    /// Compiled timing shape with this project's overrides applied
    pub fn timing_defaults(&self) -> TimingDefaults {
        TimingDefaults {
            idle_delay_ms: self.idle_delay_ms,
            console_settle_ms: self.timing.console_settle_ms,
            command_timeout_ms: self.timing.command_timeout_ms,
            command_retries: self.timing.command_retries,
            handshake_attempts: self.timing.handshake_attempts,
            handshake_backoff_ms: self.timing.handshake_backoff_ms,
            mkdir_attempts: self.timing.mkdir_attempts,
            mkdir_retry_delay_ms: self.timing.mkdir_retry_delay_ms,
            delete_verify_attempts: self.timing.delete_verify_attempts,
            delete_verify_delay_ms: self.timing.delete_verify_delay_ms,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.command_timeout_ms)
    }
}
