//! Reconciler actions.

use chatsync_proto::{ClientMessageId, MessageCursor, RoomId};

/// Actions the reconciler produces for the caller to execute.
///
/// The caller is responsible for:
/// - Fetching the room list and history pages, feeding results back
/// - Republishing the read model on change notifications
/// - Surfacing send failures and queue overflow to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilerAction {
    /// Fetch the room list and pass it to
    /// [`crate::Reconciler::apply_room_list`].
    RefreshRooms,

    /// Fetch one page of history.
    FetchHistory {
        /// Room to page through.
        room_id: RoomId,
        /// Return messages strictly older than this. `None` for the newest.
        before: Option<MessageCursor>,
        /// Page size.
        limit: usize,
    },

    /// Room list or a room summary changed.
    RoomsChanged,

    /// A room's message list changed.
    MessagesChanged {
        /// Affected room.
        room_id: RoomId,
    },

    /// A local message was marked failed.
    SendFailed {
        /// Room of the message.
        room_id: RoomId,
        /// Local message.
        client_id: ClientMessageId,
        /// Failure description.
        reason: String,
    },

    /// Queued messages were evicted from a full outbox.
    OutboxOverflow {
        /// Number evicted.
        dropped: u64,
    },
}

/// Push an action unless an equal one is already queued.
pub(crate) fn push_unique(actions: &mut Vec<ReconcilerAction>, action: ReconcilerAction) {
    if !actions.contains(&action) {
        actions.push(action);
    }
}
