// Render module - plain text output for the CLI

pub mod listing;
pub mod report;

pub use listing::{render_entries, render_ports, render_status};
pub use report::{render_diff, render_plan, render_report};
