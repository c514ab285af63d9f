//! Decoder for the initial-info frame the device sends once per connection.
//!
//! Wire layout (all integers big-endian `i32` unless noted):
//!
//! ```text
//! "scrcpy_initial"                      14 bytes
//! device name, zero padded              64 bytes
//! displays count
//! per display:
//!     DisplayInfo                       24 bytes
//!     connection count
//!     screen info length, screen info   (length 0 = absent)
//!     video settings length, settings   (length 0 = absent)
//! encoders count
//! per encoder: name length, UTF-8 name
//! client id
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::codec::{write_len_prefixed, ByteReader, ProtocolError};
use crate::protocol::display::{DisplayCombinedInfo, DisplayInfo, ScreenInfo, VideoSettings};
use crate::protocol::frame::{MAGIC_INITIAL, MAGIC_LEN};

/// Fixed width of the zero-padded device name field.
pub const DEVICE_NAME_FIELD_LENGTH: usize = 64;

/// Decoded contents of one initial-info frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialInfo {
    pub device_name: String,
    /// Displays in wire order.
    pub displays: Vec<DisplayCombinedInfo>,
    /// Encoder names; duplicates on the wire collapse into one entry.
    pub encoders: BTreeSet<String>,
    pub client_id: i32,
}

impl InitialInfo {
    /// Decodes a full frame, magic prefix included.
    ///
    /// Every length and count is bounds-checked against the buffer; a
    /// negative value or a read past the end fails the whole frame so the
    /// caller never sees half-decoded metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on a missing prefix, a negative length or
    /// count, or truncated data.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = ByteReader::new(frame);
        if reader.take(MAGIC_LEN, "initial info magic")? != MAGIC_INITIAL {
            return Err(ProtocolError::BadMagic("initial info"));
        }

        let name_field = reader.take(DEVICE_NAME_FIELD_LENGTH, "device name")?;
        let device_name = decode_device_name(name_field);

        let displays_count = reader.read_len("displays count")?;
        let mut displays = Vec::new();
        for _ in 0..displays_count {
            displays.push(read_display(&mut reader)?);
        }

        let encoders_count = reader.read_len("encoders count")?;
        let mut encoders = BTreeSet::new();
        for _ in 0..encoders_count {
            encoders.insert(reader.read_string("encoder name")?);
        }

        let client_id = reader.read_i32("client id")?;

        debug!(
            device = %device_name,
            displays = displays.len(),
            encoders = encoders.len(),
            client_id,
            "decoded initial info"
        );

        Ok(Self {
            device_name,
            displays,
            encoders,
            client_id,
        })
    }

    /// Encodes this value in the device wire layout.
    ///
    /// Used by device-side test doubles and fixtures.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the device name does not
    /// fit the 64-byte field or a nested record cannot be encoded.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let name = self.device_name.as_bytes();
        if name.len() > DEVICE_NAME_FIELD_LENGTH {
            return Err(ProtocolError::MalformedPayload(format!(
                "device name is {} bytes, field holds {DEVICE_NAME_FIELD_LENGTH}",
                name.len()
            )));
        }

        let mut buf = Vec::with_capacity(MAGIC_LEN + DEVICE_NAME_FIELD_LENGTH + 64);
        buf.extend_from_slice(MAGIC_INITIAL);
        buf.extend_from_slice(name);
        buf.resize(MAGIC_LEN + DEVICE_NAME_FIELD_LENGTH, 0);

        write_count(&mut buf, self.displays.len(), "displays count")?;
        for display in &self.displays {
            display.display_info.write(&mut buf);
            buf.extend_from_slice(&display.connection_count.to_be_bytes());
            let screen = display.screen_info.map(|s| s.to_bytes()).unwrap_or_default();
            write_len_prefixed(&mut buf, &screen, "screen info")?;
            let video = match &display.video_settings {
                Some(settings) => settings.to_bytes()?,
                None => Vec::new(),
            };
            write_len_prefixed(&mut buf, &video, "video settings")?;
        }

        write_count(&mut buf, self.encoders.len(), "encoders count")?;
        for encoder in &self.encoders {
            write_len_prefixed(&mut buf, encoder.as_bytes(), "encoder name")?;
        }

        buf.extend_from_slice(&self.client_id.to_be_bytes());
        Ok(buf)
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn read_display(reader: &mut ByteReader<'_>) -> Result<DisplayCombinedInfo, ProtocolError> {
    let display_info = DisplayInfo::read(reader)?;
    let connection_count = reader.read_i32("connection count")?;

    let screen_bytes = reader.read_len_prefixed("screen info")?;
    let screen_info = if screen_bytes.is_empty() {
        None
    } else {
        Some(ScreenInfo::from_bytes(screen_bytes)?)
    };

    let video_bytes = reader.read_len_prefixed("video settings")?;
    let video_settings = if video_bytes.is_empty() {
        None
    } else {
        Some(VideoSettings::from_bytes(video_bytes)?)
    };

    Ok(DisplayCombinedInfo {
        display_info,
        connection_count,
        screen_info,
        video_settings,
    })
}

/// Drops the trailing zero padding and decodes the rest as UTF-8.
fn decode_device_name(field: &[u8]) -> String {
    let end = field.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn write_count(buf: &mut Vec<u8>, count: usize, context: &str) -> Result<(), ProtocolError> {
    let count = i32::try_from(count)
        .map_err(|_| ProtocolError::MalformedPayload(format!("{context}: {count} exceeds i32")))?;
    buf.extend_from_slice(&count.to_be_bytes());
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
