// Error Types
// Crate-level error taxonomy for sync and arbiter operations

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::device::DeviceError;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Errors surfaced by sync, diff and arbiter operations.
///
/// Per-file failures inside a batch are not errors: they are collected in
/// [`SyncReport`](crate::operations::SyncReport).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no workspace found at {0}")]
    NoWorkspace(PathBuf),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("device handshake failed after {attempts} attempt(s): {source}")]
    Handshake {
        attempts: u32,
        #[source]
        source: DeviceError,
    },

    /// A newer request reset the queue before this task started
    #[error("superseded by a newer request")]
    Preempted,

    #[error("device task aborted: {0}")]
    TaskAborted(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid ignore rule '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Precondition failures are reported immediately and never retried
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NoWorkspace(_) | Self::Device(DeviceError::NoPortSelected)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Device(DeviceError::Cancelled))
    }
}
