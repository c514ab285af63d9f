//! droidlink-shell library crate.
//!
//! A WebSocket server that gives a browser terminal a shell on an Android
//! device by running `adb -s <udid> shell` and relaying its stdio.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser terminal (WebSocket, ?action=shell or a SHEL channel on ?action=multiplex)
//!         ↕
//! [droidlink-shell]
//!   ├── domain/           Control messages, frames, ShellServerConfig
//!   ├── application/      Output buffering and the session state machine
//!   └── infrastructure/
//!         ├── ws_server/  Accept loop, channel routing, per-shell select loop
//!         └── process/    The adb child process and its stdio pumps
//!         ↕
//! adb shell (one process per session)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` only; time is passed in.
//! - `infrastructure` depends on all other layers plus `tokio` and `tungstenite`.
//!
//! # For beginners: why buffer output at all?
//!
//! A shell writes its output in many small pieces; a prompt alone can come
//! as three or four writes.  Sending each piece as its own WebSocket message
//! floods the browser.  Collecting everything that arrives within a few
//! milliseconds and sending it as one message keeps the terminal responsive
//! without visible delay.

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: buffering and the session state machine.
pub mod application;

/// Infrastructure layer: WebSocket server and shell processes.
pub mod infrastructure;
