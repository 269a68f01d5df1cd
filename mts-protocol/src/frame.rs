//! Length-prefixed frame format for MTS.
//!
//! Frame layout (4 bytes header + payload):
//!
//! ```text
//! +-------------+----------------------------------+
//! | length      | payload (JSON envelope)          |
//! | 4 bytes LE  | length bytes                     |
//! +-------------+----------------------------------+
//! ```
//!
//! The length is written as an unsigned 32-bit integer but read back as a
//! signed one, so a prefix with the top bit set is a protocol violation.

use crate::error::ProtocolError;
use crate::MAX_MESSAGE_LENGTH;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Prepends the little-endian length prefix to `payload`.
///
/// Refuses payloads above [`MAX_MESSAGE_LENGTH`] rather than truncating them.
pub fn encode(payload: &[u8]) -> Result<BytesMut, ProtocolError> {
    if payload.len() > MAX_MESSAGE_LENGTH {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_LENGTH,
        });
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf)
}

/// Interprets a length prefix as a little-endian signed 32-bit integer.
pub fn decode_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> i32 {
    i32::from_le_bytes(prefix)
}

/// A single decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw envelope bytes (JSON).
    pub payload: Bytes,
}

impl Frame {
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Creates a frame from a JSON-serializable value.
    pub fn from_json<T: serde::Serialize>(value: &T) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(Bytes::from(payload)))
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        encode(&self.payload)
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    /// Only the consumed frame is removed; any remainder stays in `buf`.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let declared = decode_length([buf[0], buf[1], buf[2], buf[3]]);
        if declared < 0 {
            return Err(ProtocolError::NegativeLength(declared));
        }

        let payload_len = declared as usize;
        if payload_len > MAX_MESSAGE_LENGTH {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_MESSAGE_LENGTH,
            });
        }

        if buf.len() < LENGTH_PREFIX_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        Ok(Some(Self { payload }))
    }
}
