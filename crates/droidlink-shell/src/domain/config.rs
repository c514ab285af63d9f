//! Shell server configuration types.
//!
//! [`ShellServerConfig`] holds every runtime setting of the server.  `main.rs`
//! fills it from CLI arguments; tests build it directly.  Nothing here reads
//! the environment.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Close code for a shell that exited with status 0 or was stopped.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code for a shell that exited non-zero, was killed by a signal, or
/// could not be started.
pub const CLOSE_ABNORMAL: u16 = 4500;

/// How long output is collected before it is sent as one message.
pub const DEFAULT_FLUSH_WINDOW: Duration = Duration::from_millis(5);

/// Placeholder in [`ShellCommand::args`] replaced by the device serial.
pub const UDID_PLACEHOLDER: &str = "{udid}";

/// How process output is framed on the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferMode {
    /// Output is decoded as UTF-8 and sent as text messages.
    Text,
    /// Output bytes are sent untouched as binary messages.
    Binary,
}

impl BufferMode {
    /// Text on Windows, binary everywhere else.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::Text
        } else {
            Self::Binary
        }
    }
}

/// The program started for each shell session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ShellCommand {
    /// `adb -s {udid} shell` (`adb.exe` on Windows).
    fn default() -> Self {
        Self::adb(if cfg!(windows) { "adb.exe" } else { "adb" })
    }
}

impl ShellCommand {
    /// `<program> -s {udid} shell`.
    pub fn adb(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec!["-s".into(), UDID_PLACEHOLDER.into(), "shell".into()],
        }
    }

    /// Arguments with every `{udid}` replaced by `udid`.
    pub fn args_for(&self, udid: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(UDID_PLACEHOLDER, udid))
            .collect()
    }
}

/// All runtime configuration for the shell server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellServerConfig {
    pub bind_addr: SocketAddr,
    pub command: ShellCommand,
    pub buffer_mode: BufferMode,
    pub flush_window: Duration,
}

impl Default for ShellServerConfig {
    /// | Field        | Default                   |
    /// |--------------|---------------------------|
    /// | bind_addr    | `0.0.0.0:8000`            |
    /// | command      | `adb -s {udid} shell`     |
    /// | buffer_mode  | binary (text on Windows)  |
    /// | flush_window | 5 ms                      |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8000)),
            command: ShellCommand::default(),
            buffer_mode: BufferMode::platform_default(),
            flush_window: DEFAULT_FLUSH_WINDOW,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
