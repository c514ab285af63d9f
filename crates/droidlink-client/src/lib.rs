//! droidlink-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does droidlink-client do? (for beginners)
//!
//! A device host exposes each Android device over WebSocket.  The client
//! side needs to keep those sockets alive and make sense of what arrives:
//!
//! 1. `ConnectionManager` opens a socket, reopens it three seconds after an
//!    unexpected close, and queues anything sent while it is down.
//! 2. `StreamReceiver` sits on the video socket and splits the binary frames
//!    into device metadata, device messages, and raw H.264.
//! 3. `DeviceTracker` opens the tracker channel on the multiplexed socket and
//!    reports the device list whenever it changes.
//!
//! Everything is delivered through typed events; see `application::events`.

/// Application layer: connection lifecycle and frame handling.
pub mod application;

/// Infrastructure layer: the WebSocket connector.
pub mod infrastructure;

pub use application::connection::{
    ConnectionConfig, ConnectionEvent, ConnectionEventKind, ConnectionManager, ConnectionState,
};
pub use application::device_tracker::{Device, DeviceState, DeviceTracker, TrackerState};
pub use application::events::{Event, EventRegistry, Subscription};
pub use application::stream_receiver::{StreamEvent, StreamEventKind, StreamReceiver};
pub use application::transport::{Connector, Frame, TransportError};
pub use infrastructure::websocket::WsConnector;
