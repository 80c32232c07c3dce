//! Payloads pushed by the backend, and room directory bodies.

use serde::{Deserialize, Serialize};

use crate::{
    ClientMessageId, MessageCursor, MessageId, MessageKind, RoomId, UserId,
    errors::{Result, WireError},
};

/// A confirmed message as the backend describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Server-assigned id.
    pub id: MessageId,
    /// Echo of the sender's client id, if the message was sent with one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientMessageId>,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Author.
    pub sender_id: UserId,
    /// Text, or a URL/upload key for image and file messages.
    pub body: String,
    /// Content type.
    #[serde(default)]
    pub kind: MessageKind,
    /// Server timestamp in Unix milliseconds.
    pub timestamp_ms: u64,
    /// Whether the recipient has read it.
    #[serde(default)]
    pub read: bool,
}

impl WireMessage {
    /// Ordering position of this message within its room.
    pub fn cursor(&self) -> MessageCursor {
        MessageCursor::new(self.timestamp_ms, self.id.clone())
    }

    /// Reject messages missing an identity, room or sender.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(WireError::Malformed("message without id"));
        }
        if self.id.is_local() {
            return Err(WireError::Malformed("server message with local id"));
        }
        if self.room_id.is_empty() {
            return Err(WireError::Malformed("message without room"));
        }
        if self.sender_id.is_empty() {
            return Err(WireError::Malformed("message without sender"));
        }
        Ok(())
    }
}

/// Room entry of the room list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRoom {
    /// Room id.
    pub id: RoomId,
    /// Members, in the order the backend lists them.
    #[serde(default)]
    pub members: Vec<UserId>,
    /// Member count when the backend sends a truncated member list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<usize>,
    /// Latest message in the room, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<WireMessage>,
}

/// One page of room history, newest page first when paginating backward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Room the page belongs to.
    pub room_id: RoomId,
    /// Messages in any order; the reconciler sorts them.
    pub messages: Vec<WireMessage>,
    /// Whether older messages exist beyond this page.
    pub has_more: bool,
}

/// Events pushed by the backend over the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A new or echoed message.
    Message(WireMessage),

    /// Server-initiated disconnect. The client must not reconnect on its own.
    Disconnect {
        /// Reason given by the backend.
        reason: String,
    },
}

impl ServerEvent {
    /// Decode and validate an inbound payload.
    ///
    /// # Errors
    ///
    /// - [`WireError::PayloadTooLarge`] above the size limit
    /// - [`WireError::Decode`] for invalid CBOR or unknown event types
    /// - [`WireError::Malformed`] if a message fails validation
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let event: Self = super::decode(bytes)?;
        event.validate()?;
        Ok(event)
    }

    /// Encode to CBOR. Used by simulated backends.
    pub fn encode(&self) -> Result<Vec<u8>> {
        super::encode(self)
    }

    /// Structural validation.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Message(message) => message.validate(),
            Self::Disconnect { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> WireMessage {
        WireMessage {
            id: MessageId::from("m1"),
            client_id: None,
            room_id: RoomId::from("r1"),
            sender_id: UserId::from("u1"),
            body: "hello".into(),
            kind: MessageKind::Text,
            timestamp_ms: 1_700_000_000_000,
            read: false,
        }
    }

    #[test]
    fn message_event_decodes() {
        let event = ServerEvent::Message(message());
        let bytes = event.encode().unwrap();

        assert_eq!(ServerEvent::decode(&bytes).unwrap(), event);
    }

    #[test]
    fn garbage_is_rejected() {
        let result = ServerEvent::decode(&[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(WireError::Decode(_))));
    }

    #[test]
    fn message_without_id_is_malformed() {
        let mut msg = message();
        msg.id = MessageId::from("");
        let bytes = super::super::encode(&ServerEvent::Message(msg)).unwrap();

        assert_eq!(ServerEvent::decode(&bytes), Err(WireError::Malformed("message without id")));
    }

    #[test]
    fn server_cannot_claim_local_ids() {
        let mut msg = message();
        msg.id = MessageId::from("local:spoofed");

        assert!(msg.validate().is_err());
    }

    #[test]
    fn oversized_payload_is_rejected_before_parsing() {
        let bytes = vec![0u8; super::super::MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(ServerEvent::decode(&bytes), Err(WireError::PayloadTooLarge { .. })));
    }
}
