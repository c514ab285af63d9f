//! Per-display records carried inside the initial-info frame.
//!
//! Each record is a fixed big-endian layout written by the device-side server:
//!
//! | Record          | Size                 |
//! |-----------------|----------------------|
//! | `DisplayInfo`   | 24 bytes             |
//! | `ScreenInfo`    | 25 bytes             |
//! | `VideoSettings` | 35 bytes + 2 strings |

use serde::{Deserialize, Serialize};

use crate::protocol::codec::{write_len_prefixed, ByteReader, ProtocolError};

// ── Geometry helpers ──────────────────────────────────────────────────────────

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

/// Rectangle in device pixels, stored as edges rather than origin + size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    /// Widened to `i64`: the edges come straight off the wire, and their
    /// difference does not always fit in `i32`.
    pub fn width(&self) -> i64 {
        i64::from(self.right) - i64::from(self.left)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.bottom) - i64::from(self.top)
    }
}

// ── DisplayInfo ───────────────────────────────────────────────────────────────

/// Static description of one physical or virtual display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub display_id: i32,
    pub size: Size,
    pub rotation: i32,
    pub layer_stack: i32,
    pub flags: i32,
}

impl DisplayInfo {
    pub const ENCODED_LEN: usize = 24;

    pub(crate) fn read(reader: &mut ByteReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            display_id: reader.read_i32("display id")?,
            size: Size {
                width: reader.read_i32("display width")?,
                height: reader.read_i32("display height")?,
            },
            rotation: reader.read_i32("display rotation")?,
            layer_stack: reader.read_i32("display layer stack")?,
            flags: reader.read_i32("display flags")?,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::read(&mut ByteReader::new(bytes))
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        for value in [
            self.display_id,
            self.size.width,
            self.size.height,
            self.rotation,
            self.layer_stack,
            self.flags,
        ] {
            buf.extend_from_slice(&value.to_be_bytes());
        }
    }
}

// ── ScreenInfo ────────────────────────────────────────────────────────────────

/// Current capture geometry: the cropped content rectangle and the encoded
/// video size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenInfo {
    pub content_rect: Rect,
    pub video_size: Size,
    pub device_rotation: u8,
}

impl ScreenInfo {
    pub const ENCODED_LEN: usize = 25;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = ByteReader::new(bytes);
        Ok(Self {
            content_rect: Rect {
                left: reader.read_i32("screen rect left")?,
                top: reader.read_i32("screen rect top")?,
                right: reader.read_i32("screen rect right")?,
                bottom: reader.read_i32("screen rect bottom")?,
            },
            video_size: Size {
                width: reader.read_i32("screen video width")?,
                height: reader.read_i32("screen video height")?,
            },
            device_rotation: reader.read_u8("screen rotation")?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        for value in [
            self.content_rect.left,
            self.content_rect.top,
            self.content_rect.right,
            self.content_rect.bottom,
            self.video_size.width,
            self.video_size.height,
        ] {
            buf.extend_from_slice(&value.to_be_bytes());
        }
        buf.push(self.device_rotation);
        buf
    }
}

// ── VideoSettings ─────────────────────────────────────────────────────────────

/// Encoder configuration the device is currently streaming with.
///
/// Zeroed crop and bounds fields on the wire mean "not set".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoSettings {
    pub bitrate: i32,
    pub max_fps: i32,
    pub i_frame_interval: i8,
    pub bounds: Option<Size>,
    pub crop: Option<Rect>,
    pub send_frame_meta: bool,
    pub locked_video_orientation: i8,
    pub display_id: i32,
    pub codec_options: Option<String>,
    pub encoder_name: Option<String>,
}

impl VideoSettings {
    /// Length of the fixed part, including both (empty) string length prefixes.
    pub const BASE_LEN: usize = 35;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = ByteReader::new(bytes);
        let bitrate = reader.read_i32("video bitrate")?;
        let max_fps = reader.read_i32("video max fps")?;
        let i_frame_interval = reader.read_i8("video i-frame interval")?;
        let width = reader.read_i16("video bounds width")?;
        let height = reader.read_i16("video bounds height")?;
        let left = reader.read_i16("video crop left")?;
        let top = reader.read_i16("video crop top")?;
        let right = reader.read_i16("video crop right")?;
        let bottom = reader.read_i16("video crop bottom")?;
        let send_frame_meta = reader.read_i8("video send frame meta")? != 0;
        let locked_video_orientation = reader.read_i8("video locked orientation")?;
        let display_id = reader.read_i32("video display id")?;
        let codec_options = reader.read_string("video codec options")?;
        let encoder_name = reader.read_string("video encoder name")?;

        let bounds = (width != 0 || height != 0).then_some(Size {
            width: width.into(),
            height: height.into(),
        });
        let crop = (left != 0 || top != 0 || right != 0 || bottom != 0).then_some(Rect {
            left: left.into(),
            top: top.into(),
            right: right.into(),
            bottom: bottom.into(),
        });

        Ok(Self {
            bitrate,
            max_fps,
            i_frame_interval,
            bounds,
            crop,
            send_frame_meta,
            locked_video_orientation,
            display_id,
            codec_options: non_empty(codec_options),
            encoder_name: non_empty(encoder_name),
        })
    }

    /// Encodes the settings in the device wire layout.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if a bounds or crop value
    /// does not fit the 16-bit wire field.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(Self::BASE_LEN);
        buf.extend_from_slice(&self.bitrate.to_be_bytes());
        buf.extend_from_slice(&self.max_fps.to_be_bytes());
        buf.push(self.i_frame_interval as u8);

        let bounds = self.bounds.map_or([0, 0], |s| [s.width, s.height]);
        let crop = self
            .crop
            .map_or([0, 0, 0, 0], |r| [r.left, r.top, r.right, r.bottom]);
        for value in bounds.into_iter().chain(crop) {
            let narrow = i16::try_from(value).map_err(|_| {
                ProtocolError::MalformedPayload(format!("video settings value {value} exceeds i16"))
            })?;
            buf.extend_from_slice(&narrow.to_be_bytes());
        }

        buf.push(u8::from(self.send_frame_meta));
        buf.push(self.locked_video_orientation as u8);
        buf.extend_from_slice(&self.display_id.to_be_bytes());
        let codec_options = self.codec_options.as_deref().unwrap_or_default();
        write_len_prefixed(&mut buf, codec_options.as_bytes(), "video codec options")?;
        let encoder_name = self.encoder_name.as_deref().unwrap_or_default();
        write_len_prefixed(&mut buf, encoder_name.as_bytes(), "video encoder name")?;
        Ok(buf)
    }
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

// ── DisplayCombinedInfo ───────────────────────────────────────────────────────

/// Everything known about one display after an initial-info frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayCombinedInfo {
    pub display_info: DisplayInfo,
    pub connection_count: i32,
    pub screen_info: Option<ScreenInfo>,
    pub video_settings: Option<VideoSettings>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
