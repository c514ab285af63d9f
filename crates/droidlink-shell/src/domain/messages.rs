//! Message types exchanged with the terminal in the browser.
//!
//! # Message flow
//!
//! ```text
//! Browser → Server:  JSON text frame    →  ShellControl   (until started)
//!                    any frame           →  process stdin  (after start)
//! Server  → Browser: process output     →  OutboundFrame::Text / Binary
//!                    process exit        →  OutboundFrame::Close
//! ```
//!
//! # Control JSON
//!
//! Controls arrive wrapped in a `shell` envelope:
//!
//! ```json
//! {"type":"shell","data":{"type":"start","udid":"emulator-5554","cols":80,"rows":24}}
//! {"type":"shell","data":{"type":"stop"}}
//! ```
//!
//! The unwrapped form (`{"type":"start",...}`) is accepted as well.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope `type` that carries a terminal control.
pub const SHELL_ENVELOPE: &str = "shell";

/// A control message sent before the shell is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShellControl {
    /// Start `adb shell` on `udid`.  The terminal size is informational; the
    /// process is not attached to a pty.
    Start {
        udid: String,
        #[serde(default)]
        cols: Option<u16>,
        #[serde(default)]
        rows: Option<u16>,
    },
    Stop,
}

impl ShellControl {
    /// Parses a control from either the `shell` envelope or the bare form.
    ///
    /// Returns `Ok(None)` for well-formed JSON that is not a shell control
    /// (an envelope of another `type`).
    ///
    /// # Errors
    ///
    /// Returns the JSON error if `text` is not JSON or the control inside is
    /// malformed (for example `start` without `udid`).
    pub fn from_json(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let inner = match value.get("type").and_then(Value::as_str) {
            Some(SHELL_ENVELOPE) => value.get("data").cloned().unwrap_or(Value::Null),
            Some("start" | "stop") => value,
            _ => return Ok(None),
        };
        Self::deserialize(inner).map(Some)
    }
}

/// A frame received from the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPayload {
    Text(String),
    Binary(Vec<u8>),
}

impl InboundPayload {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

/// A frame to send to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Vec<u8>),
    /// Close the socket.  Always the last frame of a session.
    Close { code: u16, reason: String },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
