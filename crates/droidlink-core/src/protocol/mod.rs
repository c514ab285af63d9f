//! Wire formats: multiplexer handshake, frame classification, and the
//! records decoded from device control frames.

pub mod codec;
pub mod device_message;
pub mod display;
pub mod frame;
pub mod handshake;
pub mod initial_info;

pub use codec::ProtocolError;
pub use device_message::{DeviceEvent, DeviceMessage};
pub use display::{DisplayCombinedInfo, DisplayInfo, Rect, ScreenInfo, Size, VideoSettings};
pub use frame::{classify, decode_frame, FrameKind, InboundFrame};
pub use handshake::{
    encode_close_channel, encode_create_channel, encode_mux_frame, ChannelClose, ChannelCode,
    HandshakeError, MuxFrame, MuxMessageType,
};
pub use initial_info::InitialInfo;
