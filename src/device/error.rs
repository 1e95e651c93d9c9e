// Device Errors
// Failures raised by a device transport

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error raised by a [`DeviceTransport`](super::DeviceTransport) call
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No concrete serial port is configured ("auto" or empty)
    #[error("select a specific serial port first")]
    NoPortSelected,

    #[error("serial port busy: {0}")]
    Busy(String),

    #[error("device not responding: {0}")]
    NotResponding(String),

    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error("no such file or directory on device: {0}")]
    NotFound(String),

    /// The in-flight call was killed on request
    #[error("operation cancelled")]
    Cancelled,

    #[error("not supported by this transport: {0}")]
    Unsupported(&'static str),

    #[error("{command} failed: {message}")]
    Command { command: String, message: String },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeviceError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Errors that must stop a batch instead of being recorded per item
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoPortSelected | Self::Cancelled)
    }

    /// Errors worth retrying after a short backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Busy(_) | Self::NotResponding(_) | Self::Timeout { .. }
        )
    }
}
