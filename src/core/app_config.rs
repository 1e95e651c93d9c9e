// Application Configuration
// Defaults compiled from config.yaml at build time
// Modify config.yaml and rebuild to change these values

// Include the auto-generated config from build.rs
pub mod compiled {
    include!(concat!(env!("OUT_DIR"), "/compiled_config.rs"));
}

/// Built-in defaults for board-sync
/// Values are compiled in from config.yaml at build time
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Device connection defaults
    pub device: DeviceDefaults,

    /// Delays, timeouts and retry counts
    pub timing: TimingDefaults,

    /// Sync behavior defaults
    pub sync: SyncDefaults,

    /// Ignore rules applied before any rule file
    pub global_excludes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeviceDefaults {
    /// Serial port identifier, or "auto" when none is selected
    pub connect: String,

    /// Device-side directory the workspace maps onto
    pub root_path: String,

    /// "mpremote" or "mounted"
    pub transport: String,

    /// mpremote executable
    pub mpremote_program: String,

    /// Host python with pyserial, used for the console bridge
    pub console_python: String,

    /// Close and reopen an open console around device operations
    pub auto_suspend: bool,
}

#[derive(Debug, Clone)]
pub struct TimingDefaults {
    pub idle_delay_ms: u64,
    pub console_settle_ms: u64,
    pub command_timeout_ms: u64,
    pub command_retries: u32,
    pub handshake_attempts: u32,
    pub handshake_backoff_ms: u64,
    pub mkdir_attempts: u32,
    pub mkdir_retry_delay_ms: u64,
    pub delete_verify_attempts: u32,
    pub delete_verify_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SyncDefaults {
    /// "checksum" or "size"
    pub compare: String,

    /// Delete device-only files on push
    pub prune_on_push: bool,
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        Self {
            connect: compiled::CONNECT.to_string(),
            root_path: compiled::ROOT_PATH.to_string(),
            transport: compiled::TRANSPORT.to_string(),
            mpremote_program: compiled::MPREMOTE_PROGRAM.to_string(),
            console_python: compiled::CONSOLE_PYTHON.to_string(),
            auto_suspend: compiled::AUTO_SUSPEND,
        }
    }
}

impl Default for TimingDefaults {
    fn default() -> Self {
        Self {
            idle_delay_ms: compiled::IDLE_DELAY_MS,
            console_settle_ms: compiled::CONSOLE_SETTLE_MS,
            command_timeout_ms: compiled::COMMAND_TIMEOUT_MS,
            command_retries: compiled::COMMAND_RETRIES,
            handshake_attempts: compiled::HANDSHAKE_ATTEMPTS,
            handshake_backoff_ms: compiled::HANDSHAKE_BACKOFF_MS,
            mkdir_attempts: compiled::MKDIR_ATTEMPTS,
            mkdir_retry_delay_ms: compiled::MKDIR_RETRY_DELAY_MS,
            delete_verify_attempts: compiled::DELETE_VERIFY_ATTEMPTS,
            delete_verify_delay_ms: compiled::DELETE_VERIFY_DELAY_MS,
        }
    }
}

impl Default for SyncDefaults {
    fn default() -> Self {
        Self {
            compare: compiled::COMPARE.to_string(),
            prune_on_push: compiled::PRUNE_ON_PUSH,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device: DeviceDefaults::default(),
            timing: TimingDefaults::default(),
            sync: SyncDefaults::default(),
            global_excludes: compiled::GLOBAL_EXCLUDES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
