//! CBOR-encoded protocol messages.
//!
//! Payloads use CBOR because it is self-describing (field names embedded),
//! compact, and needs no code generation. Enums are internally tagged with a
//! `type` field so the backend can route on it without a schema.
//!
//! # Invariants
//!
//! - Every decoded [`ServerEvent`] has passed [`ServerEvent::validate`]:
//!   callers never see a message without an id, room or sender.
//! - Payloads larger than [`MAX_PAYLOAD_SIZE`] are rejected before parsing.

pub mod client;
pub mod server;

use serde::{Serialize, de::DeserializeOwned};

pub use client::{ClientRequest, SendAck};
pub use server::{HistoryPage, ServerEvent, WireMessage, WireRoom};

use crate::errors::{Result, WireError};

/// Largest payload accepted from or sent to the backend (256 KiB).
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024;

/// Serialize a value to CBOR, enforcing the size limit.
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| WireError::Encode(e.to_string()))?;

    if buf.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::PayloadTooLarge { size: buf.len(), max: MAX_PAYLOAD_SIZE });
    }

    Ok(buf)
}

/// Deserialize a value from CBOR, enforcing the size limit.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::PayloadTooLarge { size: bytes.len(), max: MAX_PAYLOAD_SIZE });
    }

    ciborium::de::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}
