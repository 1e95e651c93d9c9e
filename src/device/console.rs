// Console Session
// Interactive pass-through to the device prompt

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::debug;

use super::DeviceError;

/// Parameters a console is (re)opened with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub port: String,
}

/// An open interactive session
#[async_trait]
pub trait ConsoleSession: Send + Sync {
    fn is_open(&self) -> bool;

    /// Tear the session down and release the serial handle
    async fn close(&mut self) -> Result<(), DeviceError>;

    /// Send raw bytes, optionally followed by a line ending
    async fn send_raw(&mut self, bytes: &[u8], newline: bool) -> Result<(), DeviceError>;
}

/// Opens console sessions
#[async_trait]
pub trait ConsoleLauncher: Send + Sync {
    async fn open(&self, params: &ConnectParams) -> Result<Box<dyn ConsoleSession>, DeviceError>;
}

// Byte relay between stdin/stdout and the serial port. Runs under the host
// python with pyserial so it works with piped stdin.
const SERIAL_BRIDGE: &str = r#"
import sys, threading, serial
s = serial.Serial(sys.argv[1], 115200, timeout=0.05)
def pump():
    while True:
        d = s.read(256)
        if d:
            sys.stdout.buffer.write(d)
            sys.stdout.buffer.flush()
threading.Thread(target=pump, daemon=True).start()
while True:
    b = sys.stdin.buffer.read1(64)
    if not b:
        break
    s.write(b)
"#;

/// Launches a serial bridge child process per session
#[derive(Debug, Clone)]
pub struct ProcessConsoleLauncher {
    python: String,
}

impl ProcessConsoleLauncher {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }
}

#[async_trait]
impl ConsoleLauncher for ProcessConsoleLauncher {
    async fn open(&self, params: &ConnectParams) -> Result<Box<dyn ConsoleSession>, DeviceError> {
        if params.port.is_empty() || params.port == "auto" {
            return Err(DeviceError::NoPortSelected);
        }

        let mut child = Command::new(&self.python)
            .arg("-u")
            .arg("-c")
            .arg(SERIAL_BRIDGE)
            .arg(&params.port)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DeviceError::Spawn {
                program: self.python.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        debug!(port = %params.port, "console opened");

        Ok(Box::new(ProcessConsole { child, stdin }))
    }
}

/// A console backed by a child process
pub struct ProcessConsole {
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl ConsoleSession for ProcessConsole {
    fn is_open(&self) -> bool {
        self.stdin.is_some()
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        self.stdin.take();
        // Already-exited children report an error from kill; that is fine
        let _ = self.child.kill().await;
        debug!("console closed");
        Ok(())
    }

    async fn send_raw(&mut self, bytes: &[u8], newline: bool) -> Result<(), DeviceError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| DeviceError::NotResponding("console is closed".to_string()))?;

        let write = async {
            stdin.write_all(bytes).await?;
            if newline {
                stdin.write_all(b"\r\n").await?;
            }
            stdin.flush().await
        };

        write
            .await
            .map_err(|source| DeviceError::io("console stdin", source))
    }
}
