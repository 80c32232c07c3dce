//! Room directory contract: request/response calls for room lists and
//! history pages.

use std::future::Future;

use chatsync_proto::{HistoryPage, MessageCursor, RoomId, WireRoom};
use thiserror::Error;

/// Room directory request failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Request did not reach the backend.
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// Credentials were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Response could not be decoded.
    #[error("bad response: {0}")]
    BadResponse(String),
}

/// Remote source of room lists and message history.
pub trait RoomDirectory: Send + Sync + 'static {
    /// Rooms the signed-in user belongs to. Authoritative.
    fn fetch_rooms(&self) -> impl Future<Output = Result<Vec<WireRoom>, DirectoryError>> + Send;

    /// Up to `limit` messages strictly older than `before` (newest page if
    /// `None`).
    fn fetch_history(
        &self,
        room_id: &RoomId,
        before: Option<MessageCursor>,
        limit: usize,
    ) -> impl Future<Output = Result<HistoryPage, DirectoryError>> + Send;
}
