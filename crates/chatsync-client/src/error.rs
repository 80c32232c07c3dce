//! Reconciler error types.

use chatsync_proto::{ClientMessageId, RoomId};
use thiserror::Error;

/// Errors returned for local intents the reconciler cannot honour.
///
/// Transport and auth failures never show up here: they are absorbed into
/// message delivery state and connection health.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Room is not in the room list.
    #[error("unknown room {0}")]
    UnknownRoom(RoomId),

    /// No local message with this client id.
    #[error("unknown message {0}")]
    UnknownMessage(ClientMessageId),

    /// Only failed messages can be retried or discarded.
    #[error("message {0} is not in a failed state")]
    NotRetryable(ClientMessageId),

    /// Sending requires a signed-in user.
    #[error("no authenticated session")]
    NoSession,
}
