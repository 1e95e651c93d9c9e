// Listing Rendering
// Device directories, serial ports and local status

use std::fmt::Write;

use board_sync::device::{ListEntry, PortInfo};
use board_sync::operations::ManifestDelta;

pub fn render_entries(entries: &[ListEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(out, "{}{}", entry.name, if entry.is_dir { "/" } else { "" });
    }
    out
}

pub fn render_ports(ports: &[PortInfo]) -> String {
    if ports.is_empty() {
        return "No serial ports found.\n".to_string();
    }
    let width = ports.iter().map(|p| p.port.len()).max().unwrap_or(0);
    let mut out = String::new();
    for port in ports {
        let _ = writeln!(out, "{:width$}  {}", port.port, port.description, width = width);
    }
    out
}

/// Local changes since the last sync
pub fn render_status(delta: &ManifestDelta) -> String {
    if delta.is_empty() {
        return "No local changes since the last sync.\n".to_string();
    }
    let mut out = String::new();
    for path in &delta.changed_or_new {
        let _ = writeln!(out, "  modified/new: {}", path);
    }
    for path in &delta.deleted {
        let _ = writeln!(out, "  deleted:      {}", path);
    }
    out
}
