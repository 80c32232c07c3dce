//! Observable state snapshots for invariant checking.
//!
//! Invariants operate on snapshots rather than live state so a check sees
//! one consistent instant.

use chatsync_app::{ConnectionHealth, Message, ReadModel};
use chatsync_client::{LastMessage, Reconciler};
use chatsync_proto::RoomId;

/// Snapshot of the whole client: cache, projection and connection.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Cached rooms, sorted by id.
    pub rooms: Vec<RoomSnapshot>,
    /// Projection handed to the UI, if one was captured.
    pub read_model: Option<ReadModel>,
    /// Connection health, if one was captured.
    pub health: Option<ConnectionHealth>,
}

/// Snapshot of one cached room.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    /// Room id.
    pub id: RoomId,
    /// Denormalized preview.
    pub last_message: Option<LastMessage>,
    /// Messages in stored order.
    pub messages: Vec<Message>,
}

impl SystemSnapshot {
    /// Capture the reconciler's store alone.
    pub fn from_reconciler(reconciler: &Reconciler) -> Self {
        let mut rooms: Vec<RoomSnapshot> = reconciler
            .rooms()
            .map(|room| RoomSnapshot {
                id: room.id.clone(),
                last_message: room.last_message.clone(),
                messages: reconciler.messages(&room.id).map(<[Message]>::to_vec).unwrap_or_default(),
            })
            .collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));

        Self { rooms, read_model: None, health: None }
    }

    /// Capture store, projection and health together.
    pub fn capture(
        reconciler: &Reconciler,
        read_model: &ReadModel,
        health: &ConnectionHealth,
    ) -> Self {
        Self {
            read_model: Some(read_model.clone()),
            health: Some(health.clone()),
            ..Self::from_reconciler(reconciler)
        }
    }

    /// Rebuild the cache view from a published projection.
    ///
    /// For sessions, where only the projection is observable.
    pub fn from_read_model(read_model: &ReadModel, health: &ConnectionHealth) -> Self {
        let summaries = read_model.rooms();
        let mut rooms: Vec<RoomSnapshot> = summaries
            .iter()
            .map(|room| RoomSnapshot {
                id: room.id.clone(),
                last_message: room.last_message.clone(),
                messages: read_model.messages(&room.id).map(|m| m.to_vec()).unwrap_or_default(),
            })
            .collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));

        Self { rooms, read_model: Some(read_model.clone()), health: Some(health.clone()) }
    }

    /// Health alone, for connection-only checks.
    pub fn from_health(health: &ConnectionHealth) -> Self {
        Self { health: Some(health.clone()), ..Self::default() }
    }

    /// Every cached message across rooms.
    pub fn all_messages(&self) -> impl Iterator<Item = &Message> {
        self.rooms.iter().flat_map(|room| room.messages.iter())
    }
}
