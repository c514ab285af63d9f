//! Byte-level reading and writing helpers shared by every decoder in this crate.
//!
//! Everything the device-side server writes is big-endian.  Length-prefixed
//! fields use a signed 32-bit length, so a negative value on the wire is a
//! decode error rather than a huge allocation.

use thiserror::Error;

/// Errors that can occur while decoding or encoding a protocol payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A read ran past the end of the buffer.
    #[error("{context}: need {needed} bytes, got {available}")]
    InsufficientData {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    /// A length or count field carried a negative value.
    #[error("{context}: negative length {value}")]
    NegativeLength { context: &'static str, value: i32 },

    /// The bytes do not start with the expected magic prefix.
    #[error("missing magic prefix for {0}")]
    BadMagic(&'static str),

    /// The payload could not be interpreted (field out of range, bad UTF-8, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Forward-only cursor over a byte slice.
///
/// Every read is bounds-checked and reports the field it was reading via the
/// `context` argument, which ends up in the error message.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consumes exactly `len` bytes.
    pub fn take(&mut self, len: usize, context: &'static str) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(ProtocolError::InsufficientData {
                context,
                needed: self.pos.saturating_add(len),
                available: self.buf.len(),
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Consumes every remaining byte.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    pub fn read_u8(&mut self, context: &'static str) -> Result<u8, ProtocolError> {
        Ok(self.take(1, context)?[0])
    }

    pub fn read_i8(&mut self, context: &'static str) -> Result<i8, ProtocolError> {
        Ok(self.read_u8(context)? as i8)
    }

    pub fn read_i16(&mut self, context: &'static str) -> Result<i16, ProtocolError> {
        let b = self.take(2, context)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i32(&mut self, context: &'static str) -> Result<i32, ProtocolError> {
        let b = self.take(4, context)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a little-endian `u16`; used by multiplexer close payloads.
    pub fn read_u16_le(&mut self, context: &'static str) -> Result<u16, ProtocolError> {
        let b = self.take(2, context)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Reads a little-endian `u32`; only the channel multiplexer uses this.
    pub fn read_u32_le(&mut self, context: &'static str) -> Result<u32, ProtocolError> {
        let b = self.take(4, context)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a signed 32-bit length or count and rejects negative values.
    pub fn read_len(&mut self, context: &'static str) -> Result<usize, ProtocolError> {
        let value = self.read_i32(context)?;
        usize::try_from(value).map_err(|_| ProtocolError::NegativeLength { context, value })
    }

    /// Reads an `i32` length prefix followed by that many bytes.
    pub fn read_len_prefixed(&mut self, context: &'static str) -> Result<&'a [u8], ProtocolError> {
        let len = self.read_len(context)?;
        self.take(len, context)
    }

    /// Reads an `i32` length prefix followed by that many bytes of UTF-8.
    ///
    /// Invalid sequences are replaced rather than rejected; device and encoder
    /// names come from vendor firmware and are not always clean.
    pub fn read_string(&mut self, context: &'static str) -> Result<String, ProtocolError> {
        let bytes = self.read_len_prefixed(context)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

// ── Writer helpers ────────────────────────────────────────────────────────────

/// Appends an `i32` big-endian length prefix followed by `bytes`.
pub fn write_len_prefixed(
    buf: &mut Vec<u8>,
    bytes: &[u8],
    context: &'static str,
) -> Result<(), ProtocolError> {
    let len = i32::try_from(bytes.len()).map_err(|_| {
        ProtocolError::MalformedPayload(format!("{context}: {} bytes exceeds i32", bytes.len()))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
