//! Classification of binary frames arriving on a stream connection.
//!
//! Two 14-byte ASCII prefixes mark control frames; everything else is
//! encoded video.  Both prefixes have the same length, so one length check
//! guards both comparisons.

use crate::protocol::codec::ProtocolError;
use crate::protocol::device_message::DeviceMessage;
use crate::protocol::initial_info::InitialInfo;

/// Length shared by both magic prefixes.
pub const MAGIC_LEN: usize = 14;
pub const MAGIC_INITIAL: &[u8; MAGIC_LEN] = b"scrcpy_initial";
pub const MAGIC_DEVICE_MESSAGE: &[u8; MAGIC_LEN] = b"scrcpy_message";

/// What a binary frame contains, decided from its first bytes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    InitialInfo,
    DeviceMessage,
    Video,
}

/// A fully decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    InitialInfo(InitialInfo),
    DeviceMessage(DeviceMessage),
    /// Raw encoded video, passed through untouched.
    Video(Vec<u8>),
}

/// Classifies a frame by prefix.
///
/// A prefix only counts when the frame is strictly longer than it; a frame
/// that is exactly `scrcpy_initial` and nothing else is video.
pub fn classify(data: &[u8]) -> FrameKind {
    if data.len() > MAGIC_LEN {
        let prefix = &data[..MAGIC_LEN];
        if prefix == MAGIC_INITIAL {
            return FrameKind::InitialInfo;
        }
        if prefix == MAGIC_DEVICE_MESSAGE {
            return FrameKind::DeviceMessage;
        }
    }
    FrameKind::Video
}

/// Classifies and decodes a frame.
///
/// Video frames are moved through without copying.
///
/// # Errors
///
/// Returns [`ProtocolError`] when a frame carries a control prefix but its
/// body cannot be decoded.
pub fn decode_frame(data: Vec<u8>) -> Result<InboundFrame, ProtocolError> {
    match classify(&data) {
        FrameKind::InitialInfo => InitialInfo::decode(&data).map(InboundFrame::InitialInfo),
        FrameKind::DeviceMessage => DeviceMessage::from_frame(data).map(InboundFrame::DeviceMessage),
        FrameKind::Video => Ok(InboundFrame::Video(data)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
