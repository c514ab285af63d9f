//! Asynchronous messages pushed by the device (clipboard changes, file push
//! results).
//!
//! Layout after the 14-byte `scrcpy_message` prefix:
//!
//! ```text
//! [type:1][body:N]
//!   type 0   clipboard      [len:i32 BE][utf8 text]
//!   type 101 push response  [id:i16 BE][result:i8]
//! ```

use crate::protocol::codec::{ByteReader, ProtocolError};
use crate::protocol::frame::{MAGIC_DEVICE_MESSAGE, MAGIC_LEN};

/// Type byte of a clipboard update.
pub const TYPE_CLIPBOARD: u8 = 0;
/// Type byte of a file push acknowledgement.
pub const TYPE_PUSH_RESPONSE: u8 = 101;

/// A device message with its magic prefix stripped.
///
/// The frame buffer is kept as-is; `payload()` is a view past the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMessage {
    frame: Vec<u8>,
}

/// Typed view of a device message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Clipboard(String),
    PushResponse { id: i16, result: i8 },
    Unknown { message_type: u8 },
}

impl DeviceMessage {
    /// Wraps a frame that starts with the device-message prefix and carries at
    /// least the type byte.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::BadMagic`] or [`ProtocolError::InsufficientData`]
    /// when the frame is not a device message.
    pub fn from_frame(frame: Vec<u8>) -> Result<Self, ProtocolError> {
        if frame.len() <= MAGIC_LEN {
            return Err(ProtocolError::InsufficientData {
                context: "device message type",
                needed: MAGIC_LEN + 1,
                available: frame.len(),
            });
        }
        if &frame[..MAGIC_LEN] != MAGIC_DEVICE_MESSAGE {
            return Err(ProtocolError::BadMagic("device message"));
        }
        Ok(Self { frame })
    }

    /// Everything after the magic prefix, type byte included.
    pub fn payload(&self) -> &[u8] {
        &self.frame[MAGIC_LEN..]
    }

    pub fn message_type(&self) -> u8 {
        self.payload()[0]
    }

    /// The whole frame, prefix included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.frame
    }

    /// Decodes the body according to the type byte.
    ///
    /// Unrecognised types are not an error; they come back as
    /// [`DeviceEvent::Unknown`] so newer device servers do not break clients.
    pub fn event(&self) -> Result<DeviceEvent, ProtocolError> {
        let mut reader = ByteReader::new(&self.payload()[1..]);
        match self.message_type() {
            TYPE_CLIPBOARD => {
                let bytes = reader.read_len_prefixed("clipboard text")?;
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    ProtocolError::MalformedPayload(format!("clipboard text is not UTF-8: {e}"))
                })?;
                Ok(DeviceEvent::Clipboard(text.to_string()))
            }
            TYPE_PUSH_RESPONSE => Ok(DeviceEvent::PushResponse {
                id: reader.read_i16("push response id")?,
                result: reader.read_i8("push response result")?,
            }),
            other => Ok(DeviceEvent::Unknown {
                message_type: other,
            }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut buf = MAGIC_DEVICE_MESSAGE.to_vec();
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn test_payload_excludes_magic_prefix() {
        let msg = DeviceMessage::from_frame(frame(&[TYPE_CLIPBOARD, 0, 0, 0, 0])).unwrap();

        assert_eq!(msg.payload(), &[0, 0, 0, 0, 0]);
        assert_eq!(msg.message_type(), TYPE_CLIPBOARD);
        assert_eq!(msg.as_bytes().len(), 19);
    }

    #[test]
    fn test_clipboard_text_is_decoded() {
        // Arrange
        let mut body = vec![TYPE_CLIPBOARD];
        body.extend_from_slice(&5i32.to_be_bytes());
        body.extend_from_slice(b"hello");
        let msg = DeviceMessage::from_frame(frame(&body)).unwrap();

        // Act
        let event = msg.event().unwrap();

        // Assert
        assert_eq!(event, DeviceEvent::Clipboard("hello".to_string()));
    }

    #[test]
    fn test_push_response_is_decoded() {
        let mut body = vec![TYPE_PUSH_RESPONSE];
        body.extend_from_slice(&3i16.to_be_bytes());
        body.push(0xFF);
        let msg = DeviceMessage::from_frame(frame(&body)).unwrap();

        assert_eq!(
            msg.event().unwrap(),
            DeviceEvent::PushResponse { id: 3, result: -1 }
        );
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let msg = DeviceMessage::from_frame(frame(&[42])).unwrap();

        assert_eq!(
            msg.event().unwrap(),
            DeviceEvent::Unknown { message_type: 42 }
        );
    }

    #[test]
    fn test_truncated_clipboard_is_an_error() {
        let mut body = vec![TYPE_CLIPBOARD];
        body.extend_from_slice(&10i32.to_be_bytes());
        body.extend_from_slice(b"abc");
        let msg = DeviceMessage::from_frame(frame(&body)).unwrap();

        assert!(msg.event().is_err());
    }

    #[test]
    fn test_prefix_only_frame_is_rejected() {
        assert!(DeviceMessage::from_frame(MAGIC_DEVICE_MESSAGE.to_vec()).is_err());
    }

    #[test]
    fn test_wrong_prefix_is_rejected() {
        let mut buf = b"scrcpy_initial".to_vec();
        buf.push(0);

        assert_eq!(
            DeviceMessage::from_frame(buf),
            Err(ProtocolError::BadMagic("device message"))
        );
    }
}
