//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors raised while framing, encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown app id: {0}")]
    UnknownAppId(i32),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl ProtocolError {
    /// Returns true if the error came from a malformed payload rather than
    /// from the framing layer.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::Json(_) | ProtocolError::Base64(_) | ProtocolError::InvalidPayload(_)
        )
    }
}
