//! Application layer for the droidlink client.
//!
//! # What lives here?
//!
//! - **`events`** – The typed listener registry every component uses to fan
//!   events out to subscribers.
//!
//! - **`transport`** – The `Connector` port.  The connection manager only
//!   sees channel ends, so it can be tested without a network.
//!
//! - **`connection`** – The reconnecting connection manager: single-flight
//!   connect, fixed-delay reconnect, outbound queueing while disconnected.
//!
//! - **`stream_receiver`** – Classifies video-socket frames and keeps the
//!   device metadata decoded from initial-info frames.
//!
//! - **`device_tracker`** – Follows the device list over the `GTRC` channel
//!   of a multiplexed socket.

pub mod connection;
pub mod device_tracker;
pub mod events;
pub mod stream_receiver;
pub mod transport;
