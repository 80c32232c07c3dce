//! Read model: the UI-facing projection of rooms and messages.
//!
//! Snapshots are immutable `Arc` slices. The session republishes a new
//! [`ReadModel`] after every change; readers holding an old one keep a
//! consistent view and never observe a half-applied merge.

use std::{collections::HashMap, sync::Arc};

use chatsync_client::{LastMessage, Message, Reconciler};
use chatsync_proto::{MessageCursor, RoomId, UserId};

/// Room list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    /// Room id.
    pub id: RoomId,
    /// Ordered member list.
    pub members: Vec<UserId>,
    /// Member count.
    pub member_count: usize,
    /// Newest message.
    pub last_message: Option<LastMessage>,
    /// Unread messages from other members.
    pub unread_count: usize,
}

/// One page of a room's messages, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    /// Messages in ascending order.
    pub messages: Vec<Message>,
    /// Older messages exist in the local cache.
    pub has_more_local: bool,
    /// The backend may have older messages than the cache.
    pub has_more_remote: bool,
}

#[derive(Debug, Clone)]
struct RoomMessages {
    messages: Arc<[Message]>,
    has_more_remote: bool,
}

/// Denormalized projection of the reconciler's store.
#[derive(Debug, Clone, Default)]
pub struct ReadModel {
    rooms: Arc<[RoomSummary]>,
    messages: Arc<HashMap<RoomId, RoomMessages>>,
}

impl ReadModel {
    /// Rooms sorted by last-message timestamp, newest first.
    #[must_use]
    pub fn rooms(&self) -> Arc<[RoomSummary]> {
        Arc::clone(&self.rooms)
    }

    /// A room's messages in ascending order.
    #[must_use]
    pub fn messages(&self, room_id: &RoomId) -> Option<Arc<[Message]>> {
        self.messages.get(room_id).map(|room| Arc::clone(&room.messages))
    }

    /// Up to `limit` messages strictly older than `before`, newest page if
    /// `before` is `None`.
    #[must_use]
    pub fn messages_page(
        &self,
        room_id: &RoomId,
        before: Option<&MessageCursor>,
        limit: usize,
    ) -> Option<MessagePage> {
        let room = self.messages.get(room_id)?;

        let end = match before {
            Some(cursor) => room.messages.partition_point(|m| {
                (m.timestamp_ms, &m.id) < (cursor.timestamp_ms, &cursor.id)
            }),
            None => room.messages.len(),
        };
        let start = end.saturating_sub(limit);

        Some(MessagePage {
            messages: room.messages[start..end].to_vec(),
            has_more_local: start > 0,
            has_more_remote: room.has_more_remote,
        })
    }

    /// Rebuild the room list.
    pub(crate) fn project_rooms(&mut self, reconciler: &Reconciler) {
        let mut rooms: Vec<RoomSummary> = reconciler
            .rooms()
            .map(|room| RoomSummary {
                id: room.id.clone(),
                members: room.members.clone(),
                member_count: room.member_count,
                last_message: room.last_message.clone(),
                unread_count: reconciler.unread_count(&room.id),
            })
            .collect();

        rooms.sort_by(|a, b| {
            let a_key = a.last_message.as_ref().map(LastMessage::cursor);
            let b_key = b.last_message.as_ref().map(LastMessage::cursor);
            b_key.cmp(&a_key).then_with(|| a.id.cmp(&b.id))
        });

        self.rooms = rooms.into();
    }

    /// Rebuild one room's message list, or drop it if the room is gone.
    pub(crate) fn project_room(&mut self, reconciler: &Reconciler, room_id: &RoomId) {
        let map = Arc::make_mut(&mut self.messages);
        match reconciler.messages(room_id) {
            Some(messages) => {
                map.insert(room_id.clone(), RoomMessages {
                    messages: messages.into(),
                    has_more_remote: reconciler.has_more_history(room_id),
                });
            },
            None => {
                map.remove(room_id);
            },
        }
    }

    /// Drop rooms the reconciler no longer has.
    pub(crate) fn retain_known(&mut self, reconciler: &Reconciler) {
        if self.messages.keys().any(|id| reconciler.room(id).is_none()) {
            Arc::make_mut(&mut self.messages).retain(|id, _| reconciler.room(id).is_some());
        }
    }
}

#[cfg(test)]
mod tests {
    use chatsync_client::ReconcilerConfig;
    use chatsync_proto::{MessageId, MessageKind, WireMessage, WireRoom};

    use super::*;

    fn wire(id: &str, room: &str, ts: u64) -> WireMessage {
        WireMessage {
            id: MessageId::from(id),
            client_id: None,
            room_id: RoomId::from(room),
            sender_id: UserId::from("them"),
            body: id.to_string(),
            kind: MessageKind::Text,
            timestamp_ms: ts,
            read: false,
        }
    }

    fn room(id: &str) -> WireRoom {
        WireRoom { id: RoomId::from(id), members: Vec::new(), member_count: None, last_message: None }
    }

    fn populated() -> (Reconciler, ReadModel) {
        let mut r = Reconciler::new(ReconcilerConfig::default()).unwrap();
        r.apply_room_list(vec![room("a"), room("b"), room("c")]);
        r.handle_inbound(wire("a1", "a", 10));
        r.handle_inbound(wire("b1", "b", 30));
        for n in 0..5 {
            r.handle_inbound(wire(&format!("c{n}"), "c", 20 + n));
        }

        let mut model = ReadModel::default();
        model.project_rooms(&r);
        for id in ["a", "b", "c"] {
            model.project_room(&r, &RoomId::from(id));
        }
        (r, model)
    }

    #[test]
    fn rooms_sorted_by_recency() {
        let (_, model) = populated();
        let rooms = model.rooms();
        let order: Vec<&str> = rooms.iter().map(|r| r.id.as_str()).collect();

        assert_eq!(order, vec!["b", "c", "a"]);
        assert_eq!(rooms[0].unread_count, 1);
    }

    #[test]
    fn pages_walk_backward() {
        let (_, model) = populated();
        let room = RoomId::from("c");

        let newest = model.messages_page(&room, None, 2).unwrap();
        let ids: Vec<&str> = newest.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c4"]);
        assert!(newest.has_more_local);

        let cursor = newest.messages[0].cursor();
        let older = model.messages_page(&room, Some(&cursor), 10).unwrap();
        let ids: Vec<&str> = older.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2"]);
        assert!(!older.has_more_local);
        assert!(older.has_more_remote);
    }

    #[test]
    fn snapshots_are_isolated() {
        let (mut r, mut model) = populated();
        let before = model.messages(&RoomId::from("a")).unwrap();

        r.handle_inbound(wire("a2", "a", 11));
        model.project_room(&r, &RoomId::from("a"));

        assert_eq!(before.len(), 1);
        assert_eq!(model.messages(&RoomId::from("a")).unwrap().len(), 2);
    }
}
