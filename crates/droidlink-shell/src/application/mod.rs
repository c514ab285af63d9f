//! Application layer for droidlink-shell.
//!
//! # Responsibilities
//!
//! - Coalescing process output into one message per flush window
//!   (`output_buffer`)
//! - The per-session state machine that turns browser frames, process output,
//!   process exit, and timer expiry into frames to send (`shell_bridge`)
//!
//! Nothing here spawns tasks, reads the clock, or touches a socket.

pub mod output_buffer;
pub mod shell_bridge;

pub use output_buffer::{BinaryBuffer, OutputBuffer, OutputStream, TextBuffer};
pub use shell_bridge::{InboundAction, ShellBridge, ShellError};
