//! Cached room and message records.

use chatsync_proto::{
    ClientMessageId, MessageCursor, MessageId, MessageKind, RoomId, UserId, WireMessage, WireRoom,
};

/// Delivery progress of a message.
///
/// Messages from the backend are always `Confirmed`. Local sends start
/// `Pending` and end `Confirmed` once reconciled with the server's record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    /// Queued or in flight.
    Pending,
    /// Transport accepted it; waiting for the echo.
    Sent,
    /// Gave up. Stays visible with a retry affordance.
    Failed {
        /// Failure description.
        reason: String,
    },
    /// Server record.
    Confirmed,
}

/// A cached message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server id, or a `local:` placeholder id until confirmed.
    pub id: MessageId,
    /// Client id of a locally-initiated send. Kept after confirmation.
    pub client_id: Option<ClientMessageId>,
    /// Owning room.
    pub room_id: RoomId,
    /// Author.
    pub sender_id: UserId,
    /// Text, or a URL/upload key.
    pub body: String,
    /// Content type.
    pub kind: MessageKind,
    /// Unix milliseconds. Server time once confirmed.
    pub timestamp_ms: u64,
    /// Read flag.
    pub read: bool,
    /// Delivery progress.
    pub delivery: DeliveryState,
}

impl Message {
    /// Optimistic placeholder for a local send.
    pub fn local(
        client_id: ClientMessageId,
        room_id: RoomId,
        sender_id: UserId,
        body: String,
        kind: MessageKind,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            id: MessageId::local(client_id),
            client_id: Some(client_id),
            room_id,
            sender_id,
            body,
            kind,
            timestamp_ms,
            read: true,
            delivery: DeliveryState::Pending,
        }
    }

    /// Position in the room ordering.
    #[must_use]
    pub fn cursor(&self) -> MessageCursor {
        MessageCursor::new(self.timestamp_ms, self.id.clone())
    }

    /// True until the server record replaces this message.
    #[must_use]
    pub fn is_unconfirmed(&self) -> bool {
        self.delivery != DeliveryState::Confirmed
    }

    /// True if this message is failed and can be retried.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.delivery, DeliveryState::Failed { .. })
    }
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        Self {
            id: wire.id,
            client_id: wire.client_id,
            room_id: wire.room_id,
            sender_id: wire.sender_id,
            body: wire.body,
            kind: wire.kind,
            timestamp_ms: wire.timestamp_ms,
            read: wire.read,
            delivery: DeliveryState::Confirmed,
        }
    }
}

/// Denormalized last-message fields of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastMessage {
    /// Message id (placeholder id while pending).
    pub id: MessageId,
    /// Body.
    pub body: String,
    /// Content type.
    pub kind: MessageKind,
    /// Author.
    pub sender_id: UserId,
    /// Unix milliseconds.
    pub timestamp_ms: u64,
}

impl LastMessage {
    /// Position in the room ordering.
    #[must_use]
    pub fn cursor(&self) -> MessageCursor {
        MessageCursor::new(self.timestamp_ms, self.id.clone())
    }
}

impl From<&Message> for LastMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            body: message.body.clone(),
            kind: message.kind,
            sender_id: message.sender_id.clone(),
            timestamp_ms: message.timestamp_ms,
        }
    }
}

/// A cached room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    /// Stable id.
    pub id: RoomId,
    /// Ordered member list.
    pub members: Vec<UserId>,
    /// Member count. May exceed `members.len()` if the list is truncated.
    pub member_count: usize,
    /// Newest message seen for the room.
    pub last_message: Option<LastMessage>,
}

impl Room {
    /// Room from a room-list entry. The last message is merged separately.
    pub fn from_wire(wire: &WireRoom) -> Self {
        Self {
            id: wire.id.clone(),
            members: wire.members.clone(),
            member_count: wire.member_count.unwrap_or(wire.members.len()),
            last_message: None,
        }
    }
}
