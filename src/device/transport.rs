// Device Transport
// The seam between the sync core and whatever talks to the board

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::DeviceError;

/// One entry of a single-directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub name: String,
    pub is_dir: bool,
}

/// One entry of a recursive device listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    /// Absolute device path
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// Seconds since the device epoch (0 when unknown)
    pub mtime: u64,
}

impl DeviceEntry {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            size,
            mtime: 0,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
            size: 0,
            mtime: 0,
        }
    }
}

/// A serial port candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub port: String,
    pub description: String,
}

/// Device-side file operations over the serial link.
///
/// Implementations are not required to be safe for concurrent use: the
/// [`Arbiter`](crate::arbiter::Arbiter) guarantees only one call is in flight.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// List one directory
    async fn list(&self, path: &str) -> Result<Vec<ListEntry>, DeviceError>;

    /// Recursive listing of everything below `root` (root itself excluded)
    async fn stat_tree(&self, root: &str) -> Result<Vec<DeviceEntry>, DeviceError>;

    /// Download a file's bytes
    async fn read(&self, path: &str) -> Result<Vec<u8>, DeviceError>;

    /// Upload a local file, replacing the destination
    async fn write(&self, local: &Path, path: &str) -> Result<(), DeviceError>;

    /// Create a directory. Succeeds if it already exists.
    async fn mkdir(&self, path: &str) -> Result<(), DeviceError>;

    /// Remove a file or directory. A missing path is not an error.
    async fn delete(&self, path: &str, recursive: bool) -> Result<(), DeviceError>;

    async fn exists(&self, path: &str) -> Result<bool, DeviceError>;

    /// SHA-256 hex digest, or `None` when the device cannot compute one
    async fn checksum(&self, path: &str) -> Result<Option<String>, DeviceError>;

    /// Hard reset of the board
    async fn reset(&self) -> Result<(), DeviceError>;

    /// Soft reboot of the interpreter
    async fn soft_reset(&self) -> Result<(), DeviceError> {
        self.reset().await
    }

    /// Stop whatever program is running on the board
    async fn interrupt(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Run a local script on the board without copying it, returning its output
    async fn run_file(&self, _local: &Path) -> Result<String, DeviceError> {
        Err(DeviceError::Unsupported("run"))
    }

    async fn list_ports(&self) -> Result<Vec<PortInfo>, DeviceError>;

    /// Kill the in-flight call, if any. The next call proceeds normally.
    fn cancel(&self) {}
}
