//! In-memory room directory.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

use chatsync_app::{DirectoryError, RoomDirectory};
use chatsync_proto::{HistoryPage, MessageCursor, RoomId, WireMessage, WireRoom};

#[derive(Debug, Default)]
struct State {
    rooms: Vec<WireRoom>,
    history: HashMap<RoomId, Vec<WireMessage>>,
    failures: VecDeque<DirectoryError>,
    room_fetches: u64,
    history_fetches: u64,
}

/// Simulated room list and history backend.
#[derive(Debug, Default)]
pub struct SimDirectory {
    state: Mutex<State>,
}

impl SimDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the room list.
    pub fn set_rooms(&self, rooms: Vec<WireRoom>) {
        self.state().rooms = rooms;
    }

    /// Add a room with the given members.
    pub fn add_room(&self, room: WireRoom) {
        self.state().rooms.push(room);
    }

    /// Store server-side history for a room.
    pub fn set_history(&self, room_id: RoomId, mut messages: Vec<WireMessage>) {
        messages.sort_by_key(WireMessage::cursor);
        self.state().history.insert(room_id, messages);
    }

    /// Fail the next requests, room list or history, with these errors.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = DirectoryError>) {
        self.state().failures.extend(errors);
    }

    /// Room list requests served so far.
    pub fn room_fetches(&self) -> u64 {
        self.state().room_fetches
    }

    /// History requests served so far.
    pub fn history_fetches(&self) -> u64 {
        self.state().history_fetches
    }
}

impl RoomDirectory for SimDirectory {
    async fn fetch_rooms(&self) -> Result<Vec<WireRoom>, DirectoryError> {
        let mut state = self.state();
        state.room_fetches += 1;
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        Ok(state.rooms.clone())
    }

    async fn fetch_history(
        &self,
        room_id: &RoomId,
        before: Option<MessageCursor>,
        limit: usize,
    ) -> Result<HistoryPage, DirectoryError> {
        let mut state = self.state();
        state.history_fetches += 1;
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        let all = state.history.get(room_id).map(Vec::as_slice).unwrap_or_default();
        let end = match &before {
            Some(cursor) => all.partition_point(|m| &m.cursor() < cursor),
            None => all.len(),
        };
        let start = end.saturating_sub(limit);

        Ok(HistoryPage {
            room_id: room_id.clone(),
            messages: all[start..end].to_vec(),
            has_more: start > 0,
        })
    }
}
