//! Wire-level errors.

use thiserror::Error;

/// Result alias for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors produced while encoding or decoding payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Payload exceeds [`crate::payloads::MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// CBOR could not be decoded into the expected shape.
    #[error("decode failed: {0}")]
    Decode(String),

    /// CBOR serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Payload decoded but violates a structural rule.
    #[error("malformed payload: {0}")]
    Malformed(&'static str),
}
