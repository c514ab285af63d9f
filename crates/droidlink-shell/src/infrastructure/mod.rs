//! Infrastructure layer for droidlink-shell.
//!
//! The infrastructure layer handles all I/O: accepting WebSocket connections
//! from browsers and running the shell processes behind them.
//!
//! # Responsibilities
//!
//! - Binding a TCP listener and performing the WebSocket upgrade
//! - Spawning `adb shell` with piped stdio and reporting its output and exit
//! - Running one shell task per socket or per `SHEL` channel, with the flush
//!   timer inside it
//! - Handling the graceful shutdown signal
//!
//! # What does NOT belong here?
//!
//! - Deciding when to flush or how to close (that is `application::shell_bridge`)
//! - Message type definitions (that is the domain layer)

pub mod process;
pub mod ws_server;

pub use ws_server::{run_server, serve};
