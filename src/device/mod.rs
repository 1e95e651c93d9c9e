// Device module
// Transports that reach the board and the interactive console seam

pub mod console;
pub mod error;
pub mod mounted;
pub mod mpremote;
pub mod transport;

pub use console::{ConnectParams, ConsoleLauncher, ConsoleSession, ProcessConsoleLauncher};
pub use error::DeviceError;
pub use mounted::MountedTransport;
pub use mpremote::{normalize_connect, MpremoteSettings, MpremoteTransport};
pub use transport::{DeviceEntry, DeviceTransport, ListEntry, PortInfo};
