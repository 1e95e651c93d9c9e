// Core infrastructure module
// Provides foundational systems that other modules depend on

pub mod app;
pub mod app_config;
pub mod diff_state;
pub mod events;
pub mod project_config;

pub use app::{App, InitOutcome};
pub use app_config::AppConfig;
pub use diff_state::DiffState;
pub use events::{ConsoleInput, EventHandler};
pub use project_config::{ProjectConfig, TimingConfig, TransportKind, PROJECT_CONFIG_NAME};
