// mpremote Transport
// Device operations driven through the `mpremote` command line tool

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{DeviceEntry, DeviceError, DeviceTransport, ListEntry, PortInfo};

/// Settings for [`MpremoteTransport`]
#[derive(Debug, Clone)]
pub struct MpremoteSettings {
    /// mpremote executable
    pub program: String,
    /// Port identifier, `serial://` prefixes allowed. "auto" means none selected.
    pub connect: String,
    /// Upper bound for a single mpremote invocation
    pub timeout: Duration,
    /// Extra attempts for transient link failures
    pub retries: u32,
}

/// Strip `serial://` / `serial:/` prefixes. Returns `None` for "auto" or empty.
pub fn normalize_connect(connect: &str) -> Option<String> {
    let connect = connect.trim();
    let port = connect
        .strip_prefix("serial://")
        .or_else(|| connect.strip_prefix("serial:/"))
        .unwrap_or(connect);

    if port.is_empty() || port.eq_ignore_ascii_case("auto") {
        None
    } else {
        Some(port.to_string())
    }
}

/// Quote a string as a Python literal
fn py_str(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for ch in s.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

fn remote(path: &str) -> String {
    format!(":{}", path)
}

/// Map a failed invocation's output onto a device error
fn classify_failure(command: &str, stderr: &str, stdout: &str) -> DeviceError {
    let combined = format!("{}\n{}", stderr, stdout);
    let lower = combined.to_lowercase();
    let message = combined
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("mpremote error")
        .to_string();

    if lower.contains("enoent") || lower.contains("no such file") || lower.contains("does not exist") {
        DeviceError::NotFound(message)
    } else if lower.contains("resource busy")
        || lower.contains("in use")
        || lower.contains("could not open port")
        || lower.contains("permission denied")
        || lower.contains("access is denied")
    {
        DeviceError::Busy(message)
    } else if lower.contains("could not enter raw repl")
        || lower.contains("device not configured")
        || lower.contains("serial read failed")
        || lower.contains("connection timeout")
        || lower.contains("no device found")
        || lower.contains("failed to access")
    {
        DeviceError::NotResponding(message)
    } else {
        DeviceError::Command {
            command: command.to_string(),
            message,
        }
    }
}

fn parse_stat_tree(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.trim_end_matches('\r').splitn(4, '|');
            let kind = parts.next()?;
            let size = parts.next()?.parse().ok()?;
            let mtime = parts.next()?.parse().ok()?;
            let path = parts.next()?.to_string();
            match kind {
                "D" => Some(DeviceEntry { path, is_dir: true, size: 0, mtime }),
                "F" => Some(DeviceEntry { path, is_dir: false, size, mtime }),
                _ => None,
            }
        })
        .collect()
}

fn parse_listing(output: &str) -> Vec<ListEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (kind, name) = line.trim_end_matches('\r').split_once('|')?;
            match kind {
                "D" => Some(ListEntry { name: name.to_string(), is_dir: true }),
                "F" => Some(ListEntry { name: name.to_string(), is_dir: false }),
                _ => None,
            }
        })
        .collect()
}

fn parse_ports(output: &str) -> Vec<PortInfo> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let port = *parts.first()?;
            if parts.len() < 2 || port.contains("None") {
                return None;
            }
            let name = if parts.len() >= 4 { parts[3..].join(" ") } else { String::new() };
            let description = if name.is_empty() || name.contains("None") {
                "Serial Port".to_string()
            } else {
                name
            };
            Some(PortInfo {
                port: port.to_string(),
                description,
            })
        })
        .collect()
}

/// Drives the board through `mpremote connect <port> ...`
pub struct MpremoteTransport {
    settings: MpremoteSettings,
    cancel: Notify,
}

impl MpremoteTransport {
    pub fn new(settings: MpremoteSettings) -> Self {
        Self {
            settings,
            cancel: Notify::new(),
        }
    }

    fn port(&self) -> Result<String, DeviceError> {
        normalize_connect(&self.settings.connect).ok_or(DeviceError::NoPortSelected)
    }

    /// Run `mpremote connect <port> <args..>` and return stdout
    async fn run(&self, args: &[String]) -> Result<String, DeviceError> {
        let mut full = vec!["connect".to_string(), self.port()?];
        full.extend_from_slice(args);
        self.run_with_retry(&full).await
    }

    async fn run_with_retry(&self, args: &[String]) -> Result<String, DeviceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_once(args).await {
                Err(e) if e.is_transient() && attempt <= self.settings.retries => {
                    warn!(attempt, error = %e, "mpremote failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                }
                result => return result,
            }
        }
    }

    async fn run_once(&self, args: &[String]) -> Result<String, DeviceError> {
        let command_line = format!("{} {}", self.settings.program, args.join(" "));
        debug!(command = %command_line, "running mpremote");

        let child = Command::new(&self.settings.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DeviceError::Spawn {
                program: self.settings.program.clone(),
                source,
            })?;

        let cancelled = self.cancel.notified();

        // Dropping the child on timeout or cancel kills it
        tokio::select! {
            output = child.wait_with_output() => {
                let output = output.map_err(|source| DeviceError::Spawn {
                    program: self.settings.program.clone(),
                    source,
                })?;
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                if output.status.success() {
                    Ok(stdout)
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    Err(classify_failure(&command_line, &stderr, &stdout))
                }
            }
            _ = tokio::time::sleep(self.settings.timeout) => Err(DeviceError::Timeout {
                operation: command_line,
                after: self.settings.timeout,
            }),
            _ = cancelled => Err(DeviceError::Cancelled),
        }
    }

    /// Execute a MicroPython snippet on the board
    async fn exec(&self, code: &str) -> Result<String, DeviceError> {
        self.run(&["exec".to_string(), code.to_string()]).await
    }
}

#[async_trait]
impl DeviceTransport for MpremoteTransport {
    async fn list(&self, path: &str) -> Result<Vec<ListEntry>, DeviceError> {
        let code = format!(
            "import os\nfor e in os.ilistdir({p}):\n    print('%s|%s' % ('D' if e[1] & 0x4000 else 'F', e[0]))\n",
            p = py_str(path)
        );
        Ok(parse_listing(&self.exec(&code).await?))
    }

    async fn stat_tree(&self, root: &str) -> Result<Vec<DeviceEntry>, DeviceError> {
        let code = format!(
            "import os\n\
             def _w(d):\n\
             \x20   for e in os.ilistdir(d):\n\
             \x20       p = d.rstrip('/') + '/' + e[0]\n\
             \x20       try:\n\
             \x20           s = os.stat(p)\n\
             \x20       except OSError:\n\
             \x20           continue\n\
             \x20       if e[1] & 0x4000:\n\
             \x20           print('D|0|%d|%s' % (s[8], p))\n\
             \x20           _w(p)\n\
             \x20       else:\n\
             \x20           print('F|%d|%d|%s' % (s[6], s[8], p))\n\
             _w({root})\n",
            root = py_str(root)
        );
        Ok(parse_stat_tree(&self.exec(&code).await?))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, DeviceError> {
        let temp = std::env::temp_dir().join(format!("board-sync-{}.download", Uuid::new_v4()));
        let result = self
            .run(&[
                "fs".to_string(),
                "cp".to_string(),
                remote(path),
                temp.display().to_string(),
            ])
            .await;

        let bytes = match result {
            Ok(_) => tokio::fs::read(&temp)
                .await
                .map_err(|e| DeviceError::io(&temp, e)),
            Err(e) => Err(e),
        };
        let _ = tokio::fs::remove_file(&temp).await;
        bytes
    }

    async fn write(&self, local: &Path, path: &str) -> Result<(), DeviceError> {
        // Copy beside the target first so a board that auto-runs code never
        // sees a half-written file, then swap it into place
        let staged = format!("{}.part", path);
        self.run(&[
            "fs".to_string(),
            "cp".to_string(),
            local.display().to_string(),
            remote(&staged),
        ])
        .await?;

        let code = format!(
            "import os\n\
             try:\n\
             \x20   os.remove({dst})\n\
             except OSError:\n\
             \x20   pass\n\
             try:\n\
             \x20   os.rename({tmp}, {dst})\n\
             except OSError:\n\
             \x20   os.remove({tmp})\n\
             \x20   raise\n",
            dst = py_str(path),
            tmp = py_str(&staged)
        );
        self.exec(&code).await.map(|_| ())
    }

    async fn mkdir(&self, path: &str) -> Result<(), DeviceError> {
        match self
            .run(&["fs".to_string(), "mkdir".to_string(), remote(path)])
            .await
        {
            Ok(_) => Ok(()),
            Err(DeviceError::Command { message, .. })
                if message.to_lowercase().contains("eexist")
                    || message.to_lowercase().contains("file exists") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<(), DeviceError> {
        let mut args = vec!["fs".to_string(), "rm".to_string()];
        if recursive {
            args.push("-r".to_string());
        }
        args.push(remote(path));

        match self.run(&args).await {
            Ok(_) | Err(DeviceError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, DeviceError> {
        let code = format!(
            "import os\ntry:\n    os.stat({p})\n    print('1')\nexcept OSError:\n    print('0')\n",
            p = py_str(path)
        );
        let output = self.exec(&code).await?;
        Ok(output.lines().any(|l| l.trim() == "1"))
    }

    async fn checksum(&self, path: &str) -> Result<Option<String>, DeviceError> {
        let code = format!(
            "try:\n\
             \x20   import hashlib\n\
             \x20   try:\n\
             \x20       import binascii\n\
             \x20   except ImportError:\n\
             \x20       import ubinascii as binascii\n\
             except ImportError:\n\
             \x20   print('NOHASH')\n\
             else:\n\
             \x20   h = hashlib.sha256()\n\
             \x20   with open({p}, 'rb') as f:\n\
             \x20       while True:\n\
             \x20           b = f.read(512)\n\
             \x20           if not b:\n\
             \x20               break\n\
             \x20           h.update(b)\n\
             \x20   print(binascii.hexlify(h.digest()).decode())\n",
            p = py_str(path)
        );
        let output = self.exec(&code).await?;
        let last = output.lines().map(str::trim).filter(|l| !l.is_empty()).last();

        match last {
            Some(hex) if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) => {
                Ok(Some(hex.to_lowercase()))
            }
            _ => {
                debug!(path, "device cannot hash, falling back to size");
                Ok(None)
            }
        }
    }

    async fn reset(&self) -> Result<(), DeviceError> {
        self.run(&["reset".to_string()]).await.map(|_| ())
    }

    async fn soft_reset(&self) -> Result<(), DeviceError> {
        self.run(&["soft-reset".to_string()]).await.map(|_| ())
    }

    // Entering the raw REPL sends Ctrl-C first
    async fn interrupt(&self) -> Result<(), DeviceError> {
        self.exec("pass").await.map(|_| ())
    }

    async fn run_file(&self, local: &Path) -> Result<String, DeviceError> {
        self.run(&["run".to_string(), local.display().to_string()]).await
    }

    async fn list_ports(&self) -> Result<Vec<PortInfo>, DeviceError> {
        let output = self
            .run_with_retry(&["connect".to_string(), "list".to_string()])
            .await?;
        Ok(parse_ports(&output))
    }

    fn cancel(&self) {
        self.cancel.notify_waiters();
    }
}
