//! # droidlink-core
//!
//! Shared protocol library for droidlink, a client for observing and
//! controlling Android devices through a device host's WebSocket server.
//!
//! This crate has no dependencies on sockets, processes, or async runtimes.
//! Everything here is pure encoding, decoding, and validation, so it can be
//! tested byte-for-byte without a device.
//!
//! # Architecture overview (for beginners)
//!
//! A device host exposes each Android device over WebSocket.  One socket can
//! carry several logical channels, and the video socket interleaves three
//! kinds of binary frames.  This crate defines:
//!
//! - **`protocol`** – The bytes on the wire.  `handshake` builds the frame
//!   that opens a logical channel; `frame` decides whether an inbound binary
//!   message is initial device metadata, a device event, or raw video; and
//!   `initial_info` turns the metadata frame into typed per-display records.
//!
//! - **`domain`** – Connection parameters (`StreamParams`) and endpoint
//!   configuration (`WsConfig`) with the URL builders every client component
//!   shares.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `droidlink_core::InitialInfo` instead of the full module path.
pub use domain::config::{ConfigError, WsConfig};
pub use domain::params::{Action, ParamsError, PlayerType, StreamParams};
pub use protocol::device_message::{DeviceEvent, DeviceMessage};
pub use protocol::display::{DisplayCombinedInfo, DisplayInfo, ScreenInfo, VideoSettings};
pub use protocol::frame::{classify, decode_frame, FrameKind, InboundFrame};
pub use protocol::handshake::{
    encode_close_channel, encode_create_channel, encode_mux_frame, ChannelClose, ChannelCode,
    HandshakeError, MuxFrame, MuxMessageType,
};
pub use protocol::initial_info::InitialInfo;
pub use protocol::ProtocolError;
