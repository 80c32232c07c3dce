//! Message cache reconciler.
//!
//! Owns rooms and their message lists, and merges three sources into them:
//! optimistic local sends, inbound pushes (including echoes of our own
//! sends), and pages fetched from the room directory.
//!
//! # Invariants
//!
//! - Each room's message list is sorted ascending by `(timestamp, id)`.
//! - A server id appears at most once per room.
//! - A client id appears at most once per room: a placeholder is replaced by
//!   its confirmed record, never joined by it.
//! - A room's `last_message` is its newest message.
//! - At most one send is in flight.
//!
//! # Reconciliation
//!
//! An echo or ack is matched to its placeholder by the client id it carries.
//! Echoes without one fall back to room + sender + kind + body equality within
//! [`ReconcilerConfig::echo_match_window`].

use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::Duration,
};

use chatsync_core::{ConfigError, TransportError};
use chatsync_proto::{
    ClientMessageId, HistoryPage, MessageCursor, MessageId, MessageKind, OutgoingMessage, RoomId,
    SendAck, UserId, WireMessage, WireRoom,
};
use tracing::{debug, info, warn};

use crate::{
    error::ReconcileError,
    event::{ReconcilerAction, push_unique},
    model::{DeliveryState, LastMessage, Message, Room},
    outbox::Outbox,
};

/// Sends held while the channel is down.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 100;

/// Transmissions per send before it is marked failed.
pub const DEFAULT_MAX_SEND_ATTEMPTS: u32 = 3;

/// Tolerance for content-matching an echo that lacks a client id.
pub const DEFAULT_ECHO_MATCH_WINDOW: Duration = Duration::from_secs(30);

/// Messages per history request.
pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 30;

/// Messages for unknown rooms held until the room list refreshes.
pub const DEFAULT_UNKNOWN_ROOM_BUFFER: usize = 256;

const OVERFLOW_REASON: &str = "send queue overflow";

/// Reconciler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Outbox capacity.
    pub outbox_capacity: usize,
    /// Transmissions per send.
    pub max_send_attempts: u32,
    /// Content-match window for echoes without a client id.
    pub echo_match_window: Duration,
    /// History page size.
    pub history_page_size: usize,
    /// Unknown-room buffer size.
    pub unknown_room_buffer: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_send_attempts: DEFAULT_MAX_SEND_ATTEMPTS,
            echo_match_window: DEFAULT_ECHO_MATCH_WINDOW,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            unknown_room_buffer: DEFAULT_UNKNOWN_ROOM_BUFFER,
        }
    }
}

impl ReconcilerConfig {
    /// Check every value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbox_capacity == 0 {
            return Err(ConfigError::Zero("outbox_capacity"));
        }
        if self.max_send_attempts == 0 {
            return Err(ConfigError::Zero("max_send_attempts"));
        }
        if self.history_page_size == 0 {
            return Err(ConfigError::Zero("history_page_size"));
        }
        if self.unknown_room_buffer == 0 {
            return Err(ConfigError::Zero("unknown_room_buffer"));
        }
        Ok(())
    }
}

/// Room plus its ordered message list.
#[derive(Debug, Clone)]
struct RoomEntry {
    room: Room,
    messages: Vec<Message>,
    /// Backend may have older messages
    has_more: bool,
    history_pending: bool,
}

impl RoomEntry {
    fn new(room: Room) -> Self {
        Self { room, messages: Vec::new(), has_more: true, history_pending: false }
    }

    fn search(&self, timestamp_ms: u64, id: &MessageId) -> Result<usize, usize> {
        self.messages.binary_search_by(|m| (m.timestamp_ms, &m.id).cmp(&(timestamp_ms, id)))
    }

    /// Insert at the sorted position. False if `(timestamp, id)` exists.
    fn insert(&mut self, message: Message) -> bool {
        match self.search(message.timestamp_ms, &message.id) {
            Ok(_) => false,
            Err(pos) => {
                self.messages.insert(pos, message);
                true
            },
        }
    }

    fn contains_id(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    fn find_client(&self, client_id: ClientMessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.client_id == Some(client_id))
    }

    fn has_confirmed_client(&self, client_id: ClientMessageId) -> bool {
        self.messages.iter().any(|m| m.client_id == Some(client_id) && !m.is_unconfirmed())
    }

    /// Oldest unconfirmed message that looks like `wire`.
    fn match_by_content(&self, wire: &WireMessage, window_ms: u64) -> Option<usize> {
        self.messages.iter().position(|m| {
            m.is_unconfirmed()
                && m.sender_id == wire.sender_id
                && m.kind == wire.kind
                && m.body == wire.body
                && m.timestamp_ms.abs_diff(wire.timestamp_ms) <= window_ms
        })
    }

    fn oldest_confirmed(&self) -> Option<MessageCursor> {
        self.messages.iter().find(|m| !m.is_unconfirmed()).map(Message::cursor)
    }

    /// Point `last_message` at the newest message. True if it changed.
    fn refresh_last_message(&mut self) -> bool {
        let newest = self.messages.last().map(LastMessage::from);
        if newest == self.room.last_message {
            return false;
        }
        self.room.last_message = newest;
        true
    }
}

/// Bookkeeping for a local send until it is confirmed or discarded.
#[derive(Debug, Clone)]
struct LocalSend {
    room_id: RoomId,
    attempts: u32,
}

/// Message cache reconciler.
///
/// Pure state machine: no I/O, no clock. Callers pass the wall-clock time and
/// a fresh client id into [`Reconciler::send`].
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: ReconcilerConfig,
    self_id: Option<UserId>,
    rooms: HashMap<RoomId, RoomEntry>,
    outbox: Outbox,
    in_flight: Option<ClientMessageId>,
    local: HashMap<ClientMessageId, LocalSend>,
    unknown_room_messages: VecDeque<WireMessage>,
    refresh_pending: bool,
}

impl Reconciler {
    /// Create an empty reconciler.
    ///
    /// # Errors
    ///
    /// - `ConfigError` if the configuration is invalid
    pub fn new(config: ReconcilerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let outbox = Outbox::new(config.outbox_capacity);

        Ok(Self {
            config,
            self_id: None,
            rooms: HashMap::new(),
            outbox,
            in_flight: None,
            local: HashMap::new(),
            unknown_room_messages: VecDeque::new(),
            refresh_pending: false,
        })
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Signed-in user.
    #[must_use]
    pub fn self_id(&self) -> Option<&UserId> {
        self.self_id.as_ref()
    }

    /// Set the signed-in user. Local sends are authored by this id.
    pub fn set_self_id(&mut self, user_id: Option<UserId>) {
        self.self_id = user_id;
    }

    /// Room by id.
    #[must_use]
    pub fn room(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id).map(|entry| &entry.room)
    }

    /// All rooms, unordered.
    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values().map(|entry| &entry.room)
    }

    /// Ordered message list of a room.
    #[must_use]
    pub fn messages(&self, room_id: &RoomId) -> Option<&[Message]> {
        self.rooms.get(room_id).map(|entry| entry.messages.as_slice())
    }

    /// True if the backend may hold older messages for the room.
    #[must_use]
    pub fn has_more_history(&self, room_id: &RoomId) -> bool {
        self.rooms.get(room_id).is_some_and(|entry| entry.has_more)
    }

    /// Unread messages from other members.
    #[must_use]
    pub fn unread_count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map_or(0, |entry| {
            entry
                .messages
                .iter()
                .filter(|m| !m.read && Some(&m.sender_id) != self.self_id.as_ref())
                .count()
        })
    }

    /// Local message by client id, until it is confirmed or discarded.
    #[must_use]
    pub fn local_message(&self, client_id: ClientMessageId) -> Option<&Message> {
        let send = self.local.get(&client_id)?;
        let entry = self.rooms.get(&send.room_id)?;
        entry.find_client(client_id).map(|pos| &entry.messages[pos])
    }

    /// Sends waiting for the channel.
    #[must_use]
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Send currently handed to the transport.
    #[must_use]
    pub fn in_flight(&self) -> Option<ClientMessageId> {
        self.in_flight
    }

    /// Messages held until the room list refreshes.
    #[must_use]
    pub fn buffered_count(&self) -> usize {
        self.unknown_room_messages.len()
    }

    /// Optimistically apply a local send and queue it for transmission.
    ///
    /// The placeholder is timestamped `max(now, newest + 1)` so it lands at
    /// the tail of the room.
    ///
    /// # Errors
    ///
    /// - `ReconcileError::NoSession` if no user is signed in
    /// - `ReconcileError::UnknownRoom` if the room is not in the room list
    pub fn send(
        &mut self,
        room_id: RoomId,
        body: String,
        kind: MessageKind,
        client_id: ClientMessageId,
        now_ms: u64,
    ) -> Result<(Message, Vec<ReconcilerAction>), ReconcileError> {
        let sender_id = self.self_id.clone().ok_or(ReconcileError::NoSession)?;
        let entry = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| ReconcileError::UnknownRoom(room_id.clone()))?;

        let timestamp_ms = entry
            .messages
            .last()
            .map_or(now_ms, |newest| now_ms.max(newest.timestamp_ms.saturating_add(1)));
        let message =
            Message::local(client_id, room_id.clone(), sender_id, body, kind, timestamp_ms);

        entry.insert(message.clone());
        entry.refresh_last_message();
        self.local.insert(client_id, LocalSend { room_id: room_id.clone(), attempts: 0 });

        debug!(%room_id, %client_id, timestamp_ms, "optimistic send");

        let mut actions =
            vec![ReconcilerAction::MessagesChanged { room_id }, ReconcilerAction::RoomsChanged];
        self.enqueue(client_id, &mut actions);

        Ok((message, actions))
    }

    /// Take the next queued send for transmission.
    ///
    /// Returns `None` while another send is in flight. The caller must report
    /// the outcome through [`Reconciler::handle_send_outcome`].
    pub fn next_transmit(&mut self) -> Option<OutgoingMessage> {
        if self.in_flight.is_some() {
            return None;
        }

        while let Some(client_id) = self.outbox.pop_front() {
            let Some(send) = self.local.get_mut(&client_id) else { continue };
            let Some(entry) = self.rooms.get(&send.room_id) else { continue };
            let Some(pos) = entry.find_client(client_id) else { continue };
            let message = &entry.messages[pos];
            if message.delivery != DeliveryState::Pending {
                continue;
            }

            send.attempts += 1;
            self.in_flight = Some(client_id);
            debug!(%client_id, attempt = send.attempts, "transmitting");

            return Some(OutgoingMessage {
                client_id,
                room_id: message.room_id.clone(),
                body: message.body.clone(),
                kind: message.kind,
            });
        }
        None
    }

    /// Apply the transport's result for the in-flight send.
    ///
    /// - `Ok(Some(ack))`: confirm the placeholder with the assigned id
    /// - `Ok(None)`: accepted; wait for the echo
    /// - auth `Err`: requeue at the head without spending an attempt
    /// - transient `Err`: requeue at the head until attempts run out
    /// - other `Err`: mark failed
    pub fn handle_send_outcome(
        &mut self,
        client_id: ClientMessageId,
        outcome: Result<Option<SendAck>, TransportError>,
    ) -> Vec<ReconcilerAction> {
        let mut actions = Vec::new();
        if self.in_flight != Some(client_id) {
            debug!(%client_id, "ignoring outcome of send not in flight");
            return actions;
        }
        self.in_flight = None;

        let Some(send) = self.local.get(&client_id).cloned() else {
            // Echo already reconciled it
            debug!(%client_id, "send completed after reconciliation");
            return actions;
        };

        match outcome {
            Ok(Some(ack)) => self.confirm_ack(client_id, &send.room_id, ack, &mut actions),
            Ok(None) => {
                let Some(entry) = self.rooms.get_mut(&send.room_id) else { return actions };
                if let Some(pos) = entry.find_client(client_id) {
                    if entry.messages[pos].delivery == DeliveryState::Pending {
                        entry.messages[pos].delivery = DeliveryState::Sent;
                        actions.push(ReconcilerAction::MessagesChanged { room_id: send.room_id });
                    }
                }
            },
            Err(error) if error.is_auth() => {
                // Spends no attempt: goes out again once a new session opens
                info!(%client_id, %error, "holding send until sign-in");
                if let Some(local) = self.local.get_mut(&client_id) {
                    local.attempts = local.attempts.saturating_sub(1);
                }
                if let Some(refused) = self.outbox.push_front(client_id) {
                    self.fail(refused, OVERFLOW_REASON.to_string(), &mut actions);
                    actions.push(ReconcilerAction::OutboxOverflow { dropped: 1 });
                }
            },
            Err(error)
                if error.is_transient() && send.attempts < self.config.max_send_attempts =>
            {
                info!(%client_id, attempts = send.attempts, %error, "requeueing send");
                if let Some(refused) = self.outbox.push_front(client_id) {
                    self.fail(refused, OVERFLOW_REASON.to_string(), &mut actions);
                    actions.push(ReconcilerAction::OutboxOverflow { dropped: 1 });
                }
            },
            Err(error) => {
                warn!(%client_id, attempts = send.attempts, %error, "send failed");
                self.fail(client_id, error.to_string(), &mut actions);
            },
        }
        actions
    }

    /// Treat the in-flight send as interrupted by a closed channel.
    pub fn abort_in_flight(&mut self) -> Vec<ReconcilerAction> {
        match self.in_flight {
            Some(client_id) => self.handle_send_outcome(client_id, Err(TransportError::Closed)),
            None => Vec::new(),
        }
    }

    /// Merge a pushed message.
    ///
    /// Malformed messages are dropped. Messages for unknown rooms are held
    /// and a room-list refresh is requested.
    pub fn handle_inbound(&mut self, message: WireMessage) -> Vec<ReconcilerAction> {
        let mut actions = Vec::new();
        if !self.rooms.contains_key(&message.room_id) {
            if message.validate().is_ok() {
                self.buffer_unknown(message, &mut actions);
            } else {
                warn!(id = %message.id, "dropping malformed message");
            }
            return actions;
        }

        self.merge(message, &mut actions);
        actions
    }

    /// Replace the room list. Rooms absent from `rooms` are removed.
    pub fn apply_room_list(&mut self, rooms: Vec<WireRoom>) -> Vec<ReconcilerAction> {
        let mut actions = Vec::new();
        self.refresh_pending = false;

        let listed: HashSet<RoomId> = rooms.iter().map(|room| room.id.clone()).collect();
        let removed: Vec<RoomId> =
            self.rooms.keys().filter(|id| !listed.contains(*id)).cloned().collect();
        for room_id in removed {
            self.remove_room(&room_id, &mut actions);
        }

        for wire in rooms {
            let room = Room::from_wire(&wire);
            match self.rooms.get_mut(&wire.id) {
                Some(entry) => {
                    if entry.room.members != room.members
                        || entry.room.member_count != room.member_count
                    {
                        entry.room.members = room.members;
                        entry.room.member_count = room.member_count;
                        push_unique(&mut actions, ReconcilerAction::RoomsChanged);
                    }
                },
                None => {
                    debug!(room_id = %wire.id, "room added");
                    self.rooms.insert(wire.id.clone(), RoomEntry::new(room));
                    push_unique(&mut actions, ReconcilerAction::RoomsChanged);
                    push_unique(&mut actions, ReconcilerAction::MessagesChanged {
                        room_id: wire.id.clone(),
                    });
                },
            }

            if let Some(last) = wire.last_message {
                if last.room_id == wire.id {
                    self.merge(last, &mut actions);
                } else {
                    warn!(room_id = %wire.id, "room summary points at another room");
                }
            }
        }

        let buffered = std::mem::take(&mut self.unknown_room_messages);
        for message in buffered {
            if self.rooms.contains_key(&message.room_id) {
                self.merge(message, &mut actions);
            } else {
                warn!(room_id = %message.room_id, id = %message.id, "dropping message for unknown room");
            }
        }

        actions
    }

    /// Room-list refresh failed.
    ///
    /// Returns true while messages for unknown rooms are still held; the
    /// caller should come back through [`Reconciler::retry_room_refresh`].
    pub fn room_refresh_failed(&mut self) -> bool {
        self.refresh_pending = false;
        !self.unknown_room_messages.is_empty()
    }

    /// Ask for another room list if unknown-room messages are still held and
    /// no refresh is outstanding.
    pub fn retry_room_refresh(&mut self) -> Vec<ReconcilerAction> {
        if self.unknown_room_messages.is_empty() || self.refresh_pending {
            return Vec::new();
        }
        self.refresh_pending = true;
        vec![ReconcilerAction::RefreshRooms]
    }

    /// Request the page of history before the oldest confirmed message.
    ///
    /// Returns no action if a request is already outstanding or the backend
    /// has nothing older.
    ///
    /// # Errors
    ///
    /// - `ReconcileError::UnknownRoom` if the room is not in the room list
    pub fn request_older(
        &mut self,
        room_id: &RoomId,
    ) -> Result<Vec<ReconcilerAction>, ReconcileError> {
        let entry = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| ReconcileError::UnknownRoom(room_id.clone()))?;

        if entry.history_pending || !entry.has_more {
            return Ok(Vec::new());
        }
        entry.history_pending = true;

        Ok(vec![ReconcilerAction::FetchHistory {
            room_id: room_id.clone(),
            before: entry.oldest_confirmed(),
            limit: self.config.history_page_size,
        }])
    }

    /// Merge a fetched history page.
    pub fn apply_history(&mut self, page: HistoryPage) -> Vec<ReconcilerAction> {
        let mut actions = Vec::new();
        let Some(entry) = self.rooms.get_mut(&page.room_id) else {
            warn!(room_id = %page.room_id, "dropping history for unknown room");
            return actions;
        };
        entry.history_pending = false;
        entry.has_more = page.has_more;

        for message in page.messages {
            if message.room_id != page.room_id {
                warn!(room_id = %page.room_id, id = %message.id, "history page contains foreign message");
                continue;
            }
            self.merge(message, &mut actions);
        }

        push_unique(&mut actions, ReconcilerAction::MessagesChanged { room_id: page.room_id });
        actions
    }

    /// History fetch failed. A later request may try again.
    pub fn history_failed(&mut self, room_id: &RoomId) {
        if let Some(entry) = self.rooms.get_mut(room_id) {
            entry.history_pending = false;
        }
    }

    /// Re-queue a failed message.
    ///
    /// # Errors
    ///
    /// - `ReconcileError::UnknownMessage` if there is no such local message
    /// - `ReconcileError::NotRetryable` if the message has not failed
    pub fn retry(
        &mut self,
        client_id: ClientMessageId,
    ) -> Result<Vec<ReconcilerAction>, ReconcileError> {
        let send =
            self.local.get_mut(&client_id).ok_or(ReconcileError::UnknownMessage(client_id))?;
        let room_id = send.room_id.clone();
        let entry =
            self.rooms.get_mut(&room_id).ok_or(ReconcileError::UnknownMessage(client_id))?;
        let pos = entry.find_client(client_id).ok_or(ReconcileError::UnknownMessage(client_id))?;

        if !entry.messages[pos].is_failed() {
            return Err(ReconcileError::NotRetryable(client_id));
        }
        entry.messages[pos].delivery = DeliveryState::Pending;
        send.attempts = 0;

        info!(%client_id, %room_id, "retrying send");

        let mut actions = vec![ReconcilerAction::MessagesChanged { room_id }];
        self.enqueue(client_id, &mut actions);
        Ok(actions)
    }

    /// Remove a failed message.
    ///
    /// # Errors
    ///
    /// - `ReconcileError::UnknownMessage` if there is no such local message
    /// - `ReconcileError::NotRetryable` if the message has not failed
    pub fn discard(
        &mut self,
        client_id: ClientMessageId,
    ) -> Result<Vec<ReconcilerAction>, ReconcileError> {
        let send = self.local.get(&client_id).ok_or(ReconcileError::UnknownMessage(client_id))?;
        let room_id = send.room_id.clone();
        let entry =
            self.rooms.get_mut(&room_id).ok_or(ReconcileError::UnknownMessage(client_id))?;
        let pos = entry.find_client(client_id).ok_or(ReconcileError::UnknownMessage(client_id))?;

        if !entry.messages[pos].is_failed() {
            return Err(ReconcileError::NotRetryable(client_id));
        }
        entry.messages.remove(pos);

        let mut actions = vec![ReconcilerAction::MessagesChanged { room_id: room_id.clone() }];
        if entry.refresh_last_message() {
            actions.push(ReconcilerAction::RoomsChanged);
        }
        self.local.remove(&client_id);
        self.outbox.remove(&client_id);

        debug!(%client_id, %room_id, "discarded failed send");
        Ok(actions)
    }

    /// Mark other members' messages in a room as read.
    ///
    /// # Errors
    ///
    /// - `ReconcileError::UnknownRoom` if the room is not in the room list
    pub fn mark_read(&mut self, room_id: &RoomId) -> Result<Vec<ReconcilerAction>, ReconcileError> {
        let entry = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| ReconcileError::UnknownRoom(room_id.clone()))?;

        let mut changed = false;
        for message in &mut entry.messages {
            if !message.read && Some(&message.sender_id) != self.self_id.as_ref() {
                message.read = true;
                changed = true;
            }
        }

        if !changed {
            return Ok(Vec::new());
        }
        Ok(vec![
            ReconcilerAction::MessagesChanged { room_id: room_id.clone() },
            ReconcilerAction::RoomsChanged,
        ])
    }

    /// Drop everything: rooms, messages, outbox and buffers.
    pub fn clear(&mut self) -> Vec<ReconcilerAction> {
        let dropped = self.outbox.len();
        self.rooms.clear();
        self.local.clear();
        self.outbox.clear();
        self.in_flight = None;
        self.unknown_room_messages.clear();
        self.refresh_pending = false;

        info!(dropped_sends = dropped, "cache cleared");
        vec![ReconcilerAction::RoomsChanged]
    }

    fn enqueue(&mut self, client_id: ClientMessageId, actions: &mut Vec<ReconcilerAction>) {
        if let Some(evicted) = self.outbox.push_back(client_id) {
            warn!(%evicted, capacity = self.outbox.capacity(), "outbox full, dropping oldest send");
            self.fail(evicted, OVERFLOW_REASON.to_string(), actions);
            actions.push(ReconcilerAction::OutboxOverflow { dropped: 1 });
        }
    }

    /// Mark a local message failed. It stays visible.
    fn fail(
        &mut self,
        client_id: ClientMessageId,
        reason: String,
        actions: &mut Vec<ReconcilerAction>,
    ) {
        let Some(send) = self.local.get(&client_id) else { return };
        let Some(entry) = self.rooms.get_mut(&send.room_id) else { return };
        let Some(pos) = entry.find_client(client_id) else { return };

        entry.messages[pos].delivery = DeliveryState::Failed { reason: reason.clone() };
        let room_id = send.room_id.clone();

        push_unique(actions, ReconcilerAction::MessagesChanged { room_id: room_id.clone() });
        actions.push(ReconcilerAction::SendFailed { room_id, client_id, reason });
    }

    fn confirm_ack(
        &mut self,
        client_id: ClientMessageId,
        room_id: &RoomId,
        ack: SendAck,
        actions: &mut Vec<ReconcilerAction>,
    ) {
        let Some(entry) = self.rooms.get_mut(room_id) else { return };
        let Some(pos) = entry.find_client(client_id) else { return };

        let mut message = entry.messages.remove(pos);
        self.local.remove(&client_id);

        if entry.contains_id(&ack.message_id) {
            debug!(%client_id, id = %ack.message_id, "ack for message already merged");
        } else {
            message.id = ack.message_id;
            message.timestamp_ms = ack.timestamp_ms;
            message.delivery = DeliveryState::Confirmed;
            entry.insert(message);
        }

        push_unique(actions, ReconcilerAction::MessagesChanged { room_id: room_id.clone() });
        if entry.refresh_last_message() {
            push_unique(actions, ReconcilerAction::RoomsChanged);
        }
    }

    /// Merge a confirmed message into a known room.
    fn merge(&mut self, wire: WireMessage, actions: &mut Vec<ReconcilerAction>) {
        if let Err(error) = wire.validate() {
            warn!(%error, id = %wire.id, "dropping malformed message");
            return;
        }

        let window_ms = u64::try_from(self.config.echo_match_window.as_millis()).unwrap_or(u64::MAX);
        let room_id = wire.room_id.clone();
        let Some(entry) = self.rooms.get_mut(&room_id) else { return };

        if entry.contains_id(&wire.id) {
            debug!(id = %wire.id, %room_id, "duplicate message");
            return;
        }

        let placeholder = match wire.client_id {
            Some(client_id) if entry.has_confirmed_client(client_id) => {
                debug!(%client_id, %room_id, "duplicate echo");
                return;
            },
            Some(client_id) => entry.find_client(client_id),
            None => entry.match_by_content(&wire, window_ms),
        };

        let mut message = Message::from(wire);
        if let Some(pos) = placeholder {
            let replaced = entry.messages.remove(pos);
            if let Some(client_id) = replaced.client_id {
                self.local.remove(&client_id);
                self.outbox.remove(&client_id);
                message.client_id.get_or_insert(client_id);
                debug!(%client_id, id = %message.id, "placeholder confirmed by echo");
            }
        }

        entry.insert(message);
        push_unique(actions, ReconcilerAction::MessagesChanged { room_id });
        if entry.refresh_last_message() {
            push_unique(actions, ReconcilerAction::RoomsChanged);
        }
    }

    fn buffer_unknown(&mut self, message: WireMessage, actions: &mut Vec<ReconcilerAction>) {
        if self.unknown_room_messages.len() >= self.config.unknown_room_buffer {
            if let Some(dropped) = self.unknown_room_messages.pop_front() {
                warn!(room_id = %dropped.room_id, id = %dropped.id, "unknown-room buffer full, dropping oldest");
            }
        }
        debug!(room_id = %message.room_id, id = %message.id, "holding message for unknown room");
        self.unknown_room_messages.push_back(message);

        if !self.refresh_pending {
            self.refresh_pending = true;
            actions.push(ReconcilerAction::RefreshRooms);
        }
    }

    fn remove_room(&mut self, room_id: &RoomId, actions: &mut Vec<ReconcilerAction>) {
        let Some(entry) = self.rooms.remove(room_id) else { return };

        for client_id in entry.messages.iter().filter_map(|m| m.client_id) {
            if self.local.remove(&client_id).is_some() {
                self.outbox.remove(&client_id);
                warn!(%client_id, %room_id, "dropping local send for removed room");
            }
        }

        info!(%room_id, "room removed");
        push_unique(actions, ReconcilerAction::RoomsChanged);
        push_unique(actions, ReconcilerAction::MessagesChanged { room_id: room_id.clone() });
    }
}
