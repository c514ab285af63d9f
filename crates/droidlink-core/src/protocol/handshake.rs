//! Channel multiplexer framing.
//!
//! A single WebSocket can carry several logical channels.  Every multiplexer
//! frame starts with a 5-byte header:
//!
//! ```text
//! [msg_type:1][channel_id:4 LE][payload:N]
//! ```
//!
//! Opening a channel sends a `CreateChannel` frame whose payload is the ASCII
//! channel code (at most four bytes) naming the service on the far end, for
//! example `GTRC` for the device tracker.

use std::fmt;

use thiserror::Error;

use crate::protocol::codec::{ByteReader, ProtocolError};

/// Size of the multiplexer frame header: type byte plus little-endian channel id.
pub const MUX_HEADER_LEN: usize = 5;

/// Channel codes are always exactly this many ASCII bytes.
pub const CHANNEL_CODE_LEN: usize = 4;

/// Errors produced while building a channel-open handshake.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("channel code is empty")]
    EmptyCode,

    #[error("channel code {code:?} is {len} bytes, at most {max} allowed")]
    CodeTooLong { code: String, len: usize, max: usize },

    #[error("channel code {0:?} contains non-ASCII characters")]
    NonAsciiCode(String),
}

/// Message type byte at offset 0 of every multiplexer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MuxMessageType {
    CreateChannel = 4,
    CloseChannel = 8,
    RawBinaryData = 16,
    RawStringData = 32,
    Data = 64,
}

impl MuxMessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            4 => Some(Self::CreateChannel),
            8 => Some(Self::CloseChannel),
            16 => Some(Self::RawBinaryData),
            32 => Some(Self::RawStringData),
            64 => Some(Self::Data),
            _ => None,
        }
    }
}

/// Services reachable through a multiplexed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelCode {
    /// File listing.
    Fsls,
    /// Host tracker.
    Hsts,
    /// Remote shell.
    Shel,
    /// Android device tracker.
    Gtrc,
    /// iOS device tracker.
    Atrc,
    /// WebDriverAgent proxy.
    Wdap,
    /// QuickTime video stream.
    Qvhs,
}

impl ChannelCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fsls => "FSLS",
            Self::Hsts => "HSTS",
            Self::Shel => "SHEL",
            Self::Gtrc => "GTRC",
            Self::Atrc => "ATRC",
            Self::Wdap => "WDAP",
            Self::Qvhs => "QVHS",
        }
    }
}

impl ChannelCode {
    const ALL: [ChannelCode; 7] = [
        Self::Fsls,
        Self::Hsts,
        Self::Shel,
        Self::Gtrc,
        Self::Atrc,
        Self::Wdap,
        Self::Qvhs,
    ];

    /// Looks up the code carried by a `CreateChannel` payload.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str().as_bytes() == bytes)
    }
}

impl fmt::Display for ChannelCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Builds the `CreateChannel` frame that opens `code` on `channel_id`.
///
/// The code bytes follow the header as-is, without a length prefix.  Codes
/// longer than four bytes, empty codes, and non-ASCII codes are rejected
/// instead of being silently truncated.
///
/// # Examples
///
/// ```rust
/// use droidlink_core::protocol::handshake::encode_create_channel;
///
/// let frame = encode_create_channel(0, "GTRC").unwrap();
/// assert_eq!(frame, [4, 0, 0, 0, 0, b'G', b'T', b'R', b'C']);
/// ```
pub fn encode_create_channel(channel_id: u32, code: &str) -> Result<Vec<u8>, HandshakeError> {
    if code.is_empty() {
        return Err(HandshakeError::EmptyCode);
    }
    if !code.is_ascii() {
        return Err(HandshakeError::NonAsciiCode(code.to_string()));
    }
    if code.len() > CHANNEL_CODE_LEN {
        return Err(HandshakeError::CodeTooLong {
            code: code.to_string(),
            len: code.len(),
            max: CHANNEL_CODE_LEN,
        });
    }

    let mut frame = Vec::with_capacity(MUX_HEADER_LEN + code.len());
    frame.push(MuxMessageType::CreateChannel as u8);
    frame.extend_from_slice(&channel_id.to_le_bytes());
    frame.extend_from_slice(code.as_bytes());
    Ok(frame)
}

/// Wraps `payload` in a multiplexer frame for `channel_id`.
pub fn encode_mux_frame(message_type: MuxMessageType, channel_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MUX_HEADER_LEN + payload.len());
    frame.push(message_type as u8);
    frame.extend_from_slice(&channel_id.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Builds the `CloseChannel` frame for `channel_id`.
///
/// Payload: `[code:2 LE]`, followed by `[reason_len:4 LE][reason]` only when
/// `reason` is not empty.
pub fn encode_close_channel(channel_id: u32, code: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(6 + reason.len());
    payload.extend_from_slice(&code.to_le_bytes());
    if !reason.is_empty() {
        let len = u32::try_from(reason.len()).unwrap_or(u32::MAX);
        payload.extend_from_slice(&len.to_le_bytes());
        payload.extend_from_slice(&reason.as_bytes()[..len as usize]);
    }
    encode_mux_frame(MuxMessageType::CloseChannel, channel_id, &payload)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// A multiplexer frame borrowed from an inbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxFrame<'a> {
    /// Raw type byte; see [`MuxMessageType::from_u8`].
    pub message_type: u8,
    pub channel_id: u32,
    pub payload: &'a [u8],
}

impl<'a> MuxFrame<'a> {
    /// Splits `data` into header fields and payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InsufficientData`] if `data` is shorter than
    /// the 5-byte header.
    pub fn parse(data: &'a [u8]) -> Result<Self, ProtocolError> {
        let mut reader = ByteReader::new(data);
        let message_type = reader.read_u8("mux message type")?;
        let channel_id = reader.read_u32_le("mux channel id")?;
        Ok(Self {
            message_type,
            channel_id,
            payload: reader.take_rest(),
        })
    }

    pub fn kind(&self) -> Option<MuxMessageType> {
        MuxMessageType::from_u8(self.message_type)
    }
}

/// Close code and reason carried by a `CloseChannel` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelClose {
    pub code: u16,
    pub reason: String,
}

impl ChannelClose {
    /// Decodes the payload written by [`encode_close_channel`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InsufficientData`] if the code is missing or
    /// the reason is shorter than its declared length.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = ByteReader::new(payload);
        let code = reader.read_u16_le("close code")?;
        let reason = if reader.remaining() == 0 {
            String::new()
        } else {
            let len = reader.read_u32_le("close reason length")? as usize;
            String::from_utf8_lossy(reader.take(len, "close reason")?).into_owned()
        };
        Ok(Self { code, reason })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_create_channel_layout() {
        // Act
        let frame = encode_create_channel(0x0102_0304, "SHEL").unwrap();

        // Assert
        assert_eq!(frame.len(), 9);
        assert_eq!(frame[0], 4, "CreateChannel type byte");
        assert_eq!(&frame[1..5], &[0x04, 0x03, 0x02, 0x01], "channel id is little-endian");
        assert_eq!(&frame[5..], b"SHEL");
    }

    #[test]
    fn test_channel_code_from_bytes() {
        assert_eq!(ChannelCode::from_bytes(b"SHEL"), Some(ChannelCode::Shel));
        assert_eq!(ChannelCode::from_bytes(b"GTRC"), Some(ChannelCode::Gtrc));
        assert_eq!(ChannelCode::from_bytes(b"SHELL"), None);
        assert_eq!(ChannelCode::from_bytes(b""), None);
    }

    #[test]
    fn test_mux_data_frame_layout() {
        let frame = encode_mux_frame(MuxMessageType::RawStringData, 3, b"ls\n");

        let parsed = MuxFrame::parse(&frame).unwrap();

        assert_eq!(frame[0], 32);
        assert_eq!(parsed.channel_id, 3);
        assert_eq!(parsed.kind(), Some(MuxMessageType::RawStringData));
        assert_eq!(parsed.payload, b"ls\n");
    }

    #[test]
    fn test_close_channel_carries_code_and_reason() {
        // Act
        let frame = encode_close_channel(9, 4500, "gone");
        let parsed = MuxFrame::parse(&frame).unwrap();
        let close = ChannelClose::parse(parsed.payload).unwrap();

        // Assert
        assert_eq!(parsed.kind(), Some(MuxMessageType::CloseChannel));
        assert_eq!(&parsed.payload[..2], &[0x94, 0x11], "4500 little-endian");
        assert_eq!(
            close,
            ChannelClose {
                code: 4500,
                reason: "gone".into()
            }
        );
    }

    #[test]
    fn test_close_channel_without_reason_is_code_only() {
        let frame = encode_close_channel(1, 1000, "");

        assert_eq!(frame.len(), MUX_HEADER_LEN + 2);
        assert_eq!(
            ChannelClose::parse(&frame[MUX_HEADER_LEN..]).unwrap().reason,
            ""
        );
    }

    #[test]
    fn test_close_payload_with_short_reason_is_an_error() {
        let payload = [0xE8, 0x03, 10, 0, 0, 0, b'x'];

        assert!(ChannelClose::parse(&payload).is_err());
    }

    #[test]
    fn test_short_code_is_written_unpadded() {
        let frame = encode_create_channel(7, "AB").unwrap();

        assert_eq!(frame.len(), 7);
        assert_eq!(&frame[5..], b"AB");
    }

    #[test]
    fn test_long_code_is_rejected() {
        let err = encode_create_channel(0, "GTRCX").unwrap_err();

        assert_eq!(
            err,
            HandshakeError::CodeTooLong {
                code: "GTRCX".to_string(),
                len: 5,
                max: 4
            }
        );
    }

    #[test]
    fn test_empty_code_is_rejected() {
        assert_eq!(encode_create_channel(0, ""), Err(HandshakeError::EmptyCode));
    }

    #[test]
    fn test_non_ascii_code_is_rejected() {
        assert!(matches!(
            encode_create_channel(0, "é"),
            Err(HandshakeError::NonAsciiCode(_))
        ));
    }

    #[test]
    fn test_every_channel_code_encodes_to_nine_bytes() {
        let codes = [
            ChannelCode::Fsls,
            ChannelCode::Hsts,
            ChannelCode::Shel,
            ChannelCode::Gtrc,
            ChannelCode::Atrc,
            ChannelCode::Wdap,
            ChannelCode::Qvhs,
        ];
        for code in codes {
            let frame = encode_create_channel(1, code.as_str()).unwrap();
            assert_eq!(frame.len(), MUX_HEADER_LEN + CHANNEL_CODE_LEN, "{code}");
            assert_eq!(&frame[5..], code.as_str().as_bytes());
        }
    }

    #[test]
    fn test_parse_mux_frame_splits_header() {
        let mut data = vec![MuxMessageType::RawBinaryData as u8];
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(b"{}");

        let frame = MuxFrame::parse(&data).unwrap();

        assert_eq!(frame.kind(), Some(MuxMessageType::RawBinaryData));
        assert_eq!(frame.channel_id, 3);
        assert_eq!(frame.payload, b"{}");
    }

    #[test]
    fn test_parse_mux_frame_rejects_short_header() {
        assert!(matches!(
            MuxFrame::parse(&[4, 0, 0]),
            Err(ProtocolError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_unknown_type_byte_has_no_kind() {
        let frame = MuxFrame::parse(&[99, 0, 0, 0, 0]).unwrap();

        assert_eq!(frame.kind(), None);
        assert!(frame.payload.is_empty());
    }
}
