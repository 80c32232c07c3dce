//! Standard invariant checks.
//!
//! These capture properties that must hold after every step, whatever the
//! interleaving of pushes, sends, acks and lifecycle changes.

use std::collections::{BTreeSet, HashSet};

use chatsync_app::{ConnectionState, LastMessage};

use super::{Invariant, InvariantResult, SystemSnapshot};

/// Messages in every room ascend strictly by (timestamp, id).
pub struct MessagesSorted;

impl Invariant for MessagesSorted {
    fn name(&self) -> &'static str {
        "MessagesSorted"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            for pair in room.messages.windows(2) {
                if pair[0].cursor() >= pair[1].cursor() {
                    return Err(self.violation(format!(
                        "room {}: {} ({}) not before {} ({})",
                        room.id, pair[0].id, pair[0].timestamp_ms, pair[1].id, pair[1].timestamp_ms
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A message id appears at most once per room.
pub struct NoDuplicateIds;

impl Invariant for NoDuplicateIds {
    fn name(&self) -> &'static str {
        "NoDuplicateIds"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            let mut seen = HashSet::new();
            for message in &room.messages {
                if !seen.insert(&message.id) {
                    return Err(
                        self.violation(format!("room {}: id {} appears twice", room.id, message.id))
                    );
                }
            }
        }
        Ok(())
    }
}

/// A local send is represented by exactly one record, placeholder or
/// confirmed, anywhere in the cache.
pub struct NoDuplicateClientIds;

impl Invariant for NoDuplicateClientIds {
    fn name(&self) -> &'static str {
        "NoDuplicateClientIds"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut seen = HashSet::new();
        for message in state.all_messages() {
            if let Some(client_id) = message.client_id {
                if !seen.insert(client_id) {
                    return Err(self.violation(format!(
                        "client id {client_id} has more than one record (room {})",
                        message.room_id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A room's preview is its newest cached message.
pub struct LastMessageIsNewest;

impl Invariant for LastMessageIsNewest {
    fn name(&self) -> &'static str {
        "LastMessageIsNewest"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            let newest = room.messages.last().map(LastMessage::from);
            if newest != room.last_message {
                return Err(self.violation(format!(
                    "room {}: preview {:?} but newest is {:?}",
                    room.id,
                    room.last_message.as_ref().map(|m| &m.id),
                    newest.as_ref().map(|m| &m.id)
                )));
            }
        }
        Ok(())
    }
}

/// The projected room list is ordered newest first.
pub struct RoomsSortedByRecency;

impl Invariant for RoomsSortedByRecency {
    fn name(&self) -> &'static str {
        "RoomsSortedByRecency"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let Some(model) = &state.read_model else { return Ok(()) };
        let rooms = model.rooms();

        for pair in rooms.windows(2) {
            let a = pair[0].last_message.as_ref().map(LastMessage::cursor);
            let b = pair[1].last_message.as_ref().map(LastMessage::cursor);
            if a < b {
                return Err(self.violation(format!(
                    "room {} listed before more recent room {}",
                    pair[0].id, pair[1].id
                )));
            }
        }
        Ok(())
    }
}

/// The UI projection shows exactly what the cache holds.
pub struct ReadModelMatchesCache;

impl Invariant for ReadModelMatchesCache {
    fn name(&self) -> &'static str {
        "ReadModelMatchesCache"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let Some(model) = &state.read_model else { return Ok(()) };

        let cached: BTreeSet<_> = state.rooms.iter().map(|room| &room.id).collect();
        let projected_rooms = model.rooms();
        let projected: BTreeSet<_> = projected_rooms.iter().map(|room| &room.id).collect();
        if cached != projected {
            return Err(
                self.violation(format!("room list {projected:?} differs from cache {cached:?}"))
            );
        }

        for room in &state.rooms {
            let shown = model.messages(&room.id).map(|m| m.to_vec()).unwrap_or_default();
            if shown != room.messages {
                return Err(self.violation(format!(
                    "room {}: projection has {} messages, cache has {}",
                    room.id,
                    shown.len(),
                    room.messages.len()
                )));
            }
        }
        Ok(())
    }
}

/// Connected always means zero counted failures and no error.
pub struct ConnectedResetsAttempts;

impl Invariant for ConnectedResetsAttempts {
    fn name(&self) -> &'static str {
        "ConnectedResetsAttempts"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let Some(health) = &state.health else { return Ok(()) };
        if health.state == ConnectionState::Connected
            && (health.reconnect_attempts != 0 || health.last_error.is_some())
        {
            return Err(self.violation(format!(
                "connected with {} attempts, last error {:?}",
                health.reconnect_attempts, health.last_error
            )));
        }
        Ok(())
    }
}

/// A suspend reason is reported exactly while Suspended.
pub struct SuspendedHasReason;

impl Invariant for SuspendedHasReason {
    fn name(&self) -> &'static str {
        "SuspendedHasReason"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let Some(health) = &state.health else { return Ok(()) };
        let suspended = health.state == ConnectionState::Suspended;
        if suspended != health.suspend_reason.is_some() {
            return Err(self.violation(format!(
                "state {:?} with suspend reason {:?}",
                health.state, health.suspend_reason
            )));
        }
        Ok(())
    }
}
