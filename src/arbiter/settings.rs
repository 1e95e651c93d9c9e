// Arbiter Settings
// Named delays and retry counts for the serial access queue

use std::time::Duration;

use crate::core::app_config::{AppConfig, TimingDefaults};

/// Timing and behavior of the [`Arbiter`](super::Arbiter)
#[derive(Debug, Clone)]
pub struct ArbiterSettings {
    /// Close an open console around each task and reopen it afterwards
    pub auto_suspend: bool,
    /// Pause after closing the console so the port is released
    pub console_settle: Duration,
    /// Pause after a successful handshake before the task runs
    pub idle_delay: Duration,
    /// Total handshake attempts before giving up
    pub handshake_attempts: u32,
    /// Pause between handshake attempts
    pub handshake_backoff: Duration,
    /// Directory listed to check that the device answers
    pub handshake_path: String,
}

impl ArbiterSettings {
    pub fn from_timing(timing: &TimingDefaults, auto_suspend: bool, handshake_path: impl Into<String>) -> Self {
        Self {
            auto_suspend,
            console_settle: Duration::from_millis(timing.console_settle_ms),
            idle_delay: Duration::from_millis(timing.idle_delay_ms),
            handshake_attempts: timing.handshake_attempts.max(1),
            handshake_backoff: Duration::from_millis(timing.handshake_backoff_ms),
            handshake_path: handshake_path.into(),
        }
    }
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        let config = AppConfig::default();
        Self::from_timing(&config.timing, config.device.auto_suspend, config.device.root_path)
    }
}

/// Per-submission options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    /// Drop everything queued before this task
    pub preempt: bool,
    /// Skip the handshake and idle delay
    pub skip_idle: bool,
    /// Hard reset the board before the handshake
    pub reset_first: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            preempt: true,
            skip_idle: false,
            reset_first: false,
        }
    }
}

impl TaskOptions {
    /// Wait behind earlier tasks instead of preempting them
    pub fn queued() -> Self {
        Self {
            preempt: false,
            ..Self::default()
        }
    }

    pub fn skip_idle(mut self) -> Self {
        self.skip_idle = true;
        self
    }

    pub fn reset_first(mut self) -> Self {
        self.reset_first = true;
        self
    }
}
