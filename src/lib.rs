// board-sync Library
// Keeps a local MicroPython project and a board's filesystem in sync

// Core infrastructure - app, configuration, shared state
pub mod core;

// Serial access arbiter - single owner of the device link
pub mod arbiter;

// Device transports and the console seam
pub mod device;

// Crate error types
pub mod error;

// Logging setup for the binaries
pub mod logging;

// Operations - manifests, diffs, planning and execution
pub mod operations;

// Utilities - paths, ignore rules, digests, atomic writes
pub mod utilities;

// Re-export commonly used items for convenience
pub use arbiter::{Arbiter, ArbiterEvent, ArbiterSettings, TaskOptions};
pub use core::{App, AppConfig, DiffState, ProjectConfig};
pub use device::{DeviceEntry, DeviceError, DeviceTransport};
pub use error::{Result, SyncError};
pub use operations::{DiffEngine, DiffResult, Manifest, SyncExecutor, SyncPlan, SyncReport};
pub use utilities::IgnoreMatcher;
