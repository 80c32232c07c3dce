//! Session change notifications.

use chatsync_core::ConnectionHealth;
use chatsync_proto::{ClientMessageId, RoomId};

/// Notifications broadcast to subscribers.
///
/// Carry just enough to know what to re-read; the data itself is read from
/// the [`crate::ReadModel`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection health changed.
    HealthChanged(ConnectionHealth),

    /// Room list or a room summary changed.
    RoomsChanged,

    /// A room's message list changed.
    MessagesChanged {
        /// Affected room.
        room_id: RoomId,
    },

    /// A local message failed; show a retry affordance.
    SendFailed {
        /// Room of the message.
        room_id: RoomId,
        /// Local message.
        client_id: ClientMessageId,
        /// Failure description.
        reason: String,
    },

    /// Queued sends were dropped because the outbox was full.
    OutboxOverflow {
        /// Number dropped.
        dropped: u64,
    },

    /// Credentials were rejected; the user has to sign in again.
    AuthRequired,
}
