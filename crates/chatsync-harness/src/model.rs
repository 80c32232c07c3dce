//! Reference model of the message cache for model-based testing.
//!
//! The model stores confirmed server messages the obvious way (a map keyed
//! by position) and knows nothing about placeholders, buffering or
//! incremental insertion. Feeding the same pushes and pages to the model and
//! to the reconciler must produce the same room contents.

use std::collections::{BTreeMap, HashMap, HashSet};

use chatsync_proto::{MessageCursor, MessageId, RoomId, WireMessage};

/// Expected cache contents for server-originated messages.
#[derive(Debug, Clone, Default)]
pub struct ModelCache {
    rooms: HashMap<RoomId, Room>,
}

#[derive(Debug, Clone, Default)]
struct Room {
    ids: HashSet<MessageId>,
    messages: BTreeMap<MessageCursor, WireMessage>,
}

impl ModelCache {
    /// Model with the given rooms and no messages.
    pub fn with_rooms(rooms: impl IntoIterator<Item = RoomId>) -> Self {
        Self { rooms: rooms.into_iter().map(|id| (id, Room::default())).collect() }
    }

    /// Apply a pushed or paged message. First copy of an id wins; invalid
    /// messages and unknown rooms are ignored.
    pub fn apply(&mut self, message: &WireMessage) {
        if message.validate().is_err() {
            return;
        }
        let Some(room) = self.rooms.get_mut(&message.room_id) else { return };
        if room.ids.insert(message.id.clone()) {
            room.messages.insert(message.cursor(), message.clone());
        }
    }

    /// Expected message ids of a room, oldest first.
    pub fn ids(&self, room_id: &RoomId) -> Vec<MessageId> {
        self.rooms
            .get(room_id)
            .map(|room| room.messages.values().map(|m| m.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Expected newest message id of a room.
    pub fn newest(&self, room_id: &RoomId) -> Option<&MessageId> {
        self.rooms.get(room_id)?.messages.values().next_back().map(|m| &m.id)
    }
}
