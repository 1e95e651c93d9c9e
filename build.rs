// Build script - reads config.yaml at compile time and generates defaults
// This allows changing defaults during development without editing source code

use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Tell Cargo to rerun if config.yaml changes
    println!("cargo:rerun-if-changed=src/config.yaml");

    let out_dir = env::var("OUT_DIR").unwrap();
    let dest_path = Path::new(&out_dir).join("compiled_config.rs");

    // Try to read config.yaml from src/, fall back to hardcoded defaults if not found
    let config = if Path::new("src/config.yaml").exists() {
        let content = fs::read_to_string("src/config.yaml")
            .expect("Failed to read src/config.yaml");
        parse_config(&content)
    } else {
        CompiledConfig::default()
    };

    let generated = format!(
        r#"// Auto-generated from config.yaml at compile time
// Do not edit - modify config.yaml and rebuild instead

pub const CONNECT: &str = {connect:?};
pub const ROOT_PATH: &str = {root_path:?};
pub const TRANSPORT: &str = {transport:?};
pub const MPREMOTE_PROGRAM: &str = {mpremote_program:?};
pub const CONSOLE_PYTHON: &str = {console_python:?};
pub const AUTO_SUSPEND: bool = {auto_suspend};

pub const IDLE_DELAY_MS: u64 = {idle_delay_ms};
pub const CONSOLE_SETTLE_MS: u64 = {console_settle_ms};
pub const COMMAND_TIMEOUT_MS: u64 = {command_timeout_ms};
pub const COMMAND_RETRIES: u32 = {command_retries};
pub const HANDSHAKE_ATTEMPTS: u32 = {handshake_attempts};
pub const HANDSHAKE_BACKOFF_MS: u64 = {handshake_backoff_ms};
pub const MKDIR_ATTEMPTS: u32 = {mkdir_attempts};
pub const MKDIR_RETRY_DELAY_MS: u64 = {mkdir_retry_delay_ms};
pub const DELETE_VERIFY_ATTEMPTS: u32 = {delete_verify_attempts};
pub const DELETE_VERIFY_DELAY_MS: u64 = {delete_verify_delay_ms};

pub const COMPARE: &str = {compare:?};
pub const PRUNE_ON_PUSH: bool = {prune_on_push};

pub const GLOBAL_EXCLUDES: &[&str] = &[
{excludes}
];
"#,
        connect = config.connect,
        root_path = config.root_path,
        transport = config.transport,
        mpremote_program = config.mpremote_program,
        console_python = config.console_python,
        auto_suspend = config.auto_suspend,
        idle_delay_ms = config.idle_delay_ms,
        console_settle_ms = config.console_settle_ms,
        command_timeout_ms = config.command_timeout_ms,
        command_retries = config.command_retries,
        handshake_attempts = config.handshake_attempts,
        handshake_backoff_ms = config.handshake_backoff_ms,
        mkdir_attempts = config.mkdir_attempts,
        mkdir_retry_delay_ms = config.mkdir_retry_delay_ms,
        delete_verify_attempts = config.delete_verify_attempts,
        delete_verify_delay_ms = config.delete_verify_delay_ms,
        compare = config.compare,
        prune_on_push = config.prune_on_push,
        excludes = config.global_excludes
            .iter()
            .map(|e| format!("    {:?},", e))
            .collect::<Vec<_>>()
            .join("\n"),
    );

    fs::write(&dest_path, generated).expect("Failed to write compiled config");
}

struct CompiledConfig {
    connect: String,
    root_path: String,
    transport: String,
    mpremote_program: String,
    console_python: String,
    auto_suspend: bool,
    idle_delay_ms: u64,
    console_settle_ms: u64,
    command_timeout_ms: u64,
    command_retries: u32,
    handshake_attempts: u32,
    handshake_backoff_ms: u64,
    mkdir_attempts: u32,
    mkdir_retry_delay_ms: u64,
    delete_verify_attempts: u32,
    delete_verify_delay_ms: u64,
    compare: String,
    prune_on_push: bool,
    global_excludes: Vec<String>,
}

impl Default for CompiledConfig {
    fn default() -> Self {
        Self {
            connect: "auto".to_string(),
            root_path: "/".to_string(),
            transport: "mpremote".to_string(),
            mpremote_program: "mpremote".to_string(),
            console_python: "python3".to_string(),
            auto_suspend: true,
            idle_delay_ms: 150,
            console_settle_ms: 300,
            command_timeout_ms: 20_000,
            command_retries: 2,
            handshake_attempts: 2,
            handshake_backoff_ms: 200,
            mkdir_attempts: 3,
            mkdir_retry_delay_ms: 100,
            delete_verify_attempts: 3,
            delete_verify_delay_ms: 200,
            compare: "checksum".to_string(),
            prune_on_push: false,
            global_excludes: vec![
                ".git/".to_string(),
                ".vscode/".to_string(),
                ".idea/".to_string(),
                "node_modules/".to_string(),
                "__pycache__/".to_string(),
                ".DS_Store".to_string(),
                "*.swp".to_string(),
                ".board-sync/".to_string(),
            ],
        }
    }
}

#[derive(PartialEq)]
enum Section {
    None,
    Device,
    Timing,
    Sync,
    Excludes,
}

fn parse_config(content: &str) -> CompiledConfig {
    let mut config = CompiledConfig::default();

    // Simple YAML parsing (avoiding external dependencies in build script)
    let mut section = Section::None;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        // Top-level keys switch sections
        if !line.starts_with(' ') && !line.starts_with('\t') {
            section = match trimmed.trim_end_matches(':') {
                "device" => Section::Device,
                "timing" => Section::Timing,
                "sync" => Section::Sync,
                "global_excludes" => {
                    config.global_excludes.clear(); // Start fresh when we see the section
                    Section::Excludes
                }
                _ => Section::None,
            };
            continue;
        }

        if section == Section::Excludes {
            if let Some(item) = trimmed.strip_prefix("- ") {
                config.global_excludes.push(unquote(item).to_string());
            }
            continue;
        }

        let Some((key, value)) = parse_kv(trimmed) else {
            continue;
        };

        match section {
            Section::Device => match key {
                "connect" => config.connect = unquote(value).to_string(),
                "root_path" => config.root_path = unquote(value).to_string(),
                "transport" => config.transport = unquote(value).to_string(),
                "mpremote_program" => config.mpremote_program = unquote(value).to_string(),
                "console_python" => config.console_python = unquote(value).to_string(),
                "auto_suspend" => config.auto_suspend = parse_bool(value),
                _ => {}
            },
            Section::Timing => match key {
                "idle_delay_ms" => config.idle_delay_ms = value.parse().unwrap_or(config.idle_delay_ms),
                "console_settle_ms" => config.console_settle_ms = value.parse().unwrap_or(config.console_settle_ms),
                "command_timeout_ms" => config.command_timeout_ms = value.parse().unwrap_or(config.command_timeout_ms),
                "command_retries" => config.command_retries = value.parse().unwrap_or(config.command_retries),
                "handshake_attempts" => config.handshake_attempts = value.parse().unwrap_or(config.handshake_attempts),
                "handshake_backoff_ms" => config.handshake_backoff_ms = value.parse().unwrap_or(config.handshake_backoff_ms),
                "mkdir_attempts" => config.mkdir_attempts = value.parse().unwrap_or(config.mkdir_attempts),
                "mkdir_retry_delay_ms" => config.mkdir_retry_delay_ms = value.parse().unwrap_or(config.mkdir_retry_delay_ms),
                "delete_verify_attempts" => config.delete_verify_attempts = value.parse().unwrap_or(config.delete_verify_attempts),
                "delete_verify_delay_ms" => config.delete_verify_delay_ms = value.parse().unwrap_or(config.delete_verify_delay_ms),
                _ => {}
            },
            Section::Sync => match key {
                "compare" => config.compare = unquote(value).to_string(),
                "prune_on_push" => config.prune_on_push = parse_bool(value),
                _ => {}
            },
            _ => {}
        }
    }

    config
}

fn parse_kv(line: &str) -> Option<(&str, &str)> {
    let colon_pos = line.find(':')?;
    let key = line[..colon_pos].trim();
    let mut value = line[colon_pos + 1..].trim();

    // Remove inline comments
    if let Some(comment_pos) = value.find(" #") {
        value = value[..comment_pos].trim();
    }

    // Skip if value is empty (section header)
    if value.is_empty() {
        return None;
    }

    Some((key, value))
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('"').trim_matches('\'')
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "yes" | "1")
}
