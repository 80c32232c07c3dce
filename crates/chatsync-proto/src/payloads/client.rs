//! Payloads sent by the client.

use serde::{Deserialize, Serialize};

use crate::{ClientMessageId, MessageId, MessageKind, RoomId, errors::Result};

/// Body of a `sendMessage` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Id the backend must echo on the confirmed message.
    pub client_id: ClientMessageId,
    /// Target room.
    pub room_id: RoomId,
    /// Message body.
    pub body: String,
    /// Content type.
    pub kind: MessageKind,
}

/// Requests sent over the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Post a message to a room.
    SendMessage(OutgoingMessage),
}

impl ClientRequest {
    /// Encode to CBOR.
    pub fn encode(&self) -> Result<Vec<u8>> {
        super::encode(self)
    }

    /// Decode from CBOR. Used by simulated backends.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        super::decode(bytes)
    }
}

/// Synchronous acknowledgement of a send.
///
/// Some backends answer a send with the assigned id and timestamp; others
/// only echo the message later. Both paths reconcile the same placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    /// Server-assigned id.
    pub message_id: MessageId,
    /// Server timestamp in Unix milliseconds.
    pub timestamp_ms: u64,
}
