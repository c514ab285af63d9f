//! Domain layer for droidlink-shell.
//!
//! Pure types with no I/O: the JSON control messages, the frames exchanged
//! with the browser, and the server configuration.

pub mod config;
pub mod messages;

pub use config::{BufferMode, ShellCommand, ShellServerConfig, CLOSE_ABNORMAL, CLOSE_NORMAL};
pub use messages::{InboundPayload, OutboundFrame, ShellControl};
