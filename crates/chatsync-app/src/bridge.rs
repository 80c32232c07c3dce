//! Connection-to-cache translation layer.
//!
//! The [`Bridge`] wraps the [`ConnectionManager`] and the [`Reconciler`] and
//! wires their actions together without performing any I/O.
//!
//! # Responsibilities
//!
//! - Feeds lifecycle signals and transport outcomes into the connection
//!   manager, and turns its actions into transport [`Effect`]s.
//! - Decodes inbound payloads and merges them through the reconciler.
//! - Drains the outbox one send at a time, only while Connected.
//! - Keeps the [`ReadModel`] projection in step with the reconciler and
//!   announces changes as [`SessionEvent`]s.
//! - Stays generic over [`Environment`] so the same code runs in production
//!   and in deterministic simulation.

use std::{collections::BTreeSet, time::Duration};

use chatsync_client::{Message, ReconcileError, Reconciler, ReconcilerAction, ReconcilerConfig};
use chatsync_core::{
    AppLifecycle, AuthSession, ConfigError, ConnectionAction, ConnectionConfig, ConnectionEvent,
    ConnectionHealth, ConnectionManager, ConnectionState, Environment, LifecycleSnapshot,
    TransportError,
};
use chatsync_proto::{
    ClientMessageId, ClientRequest, HistoryPage, MessageCursor, MessageKind, RoomId, SendAck,
    ServerEvent, WireRoom,
};
use tracing::{debug, info, warn};

use crate::{DirectoryError, ReadModel, SessionEvent};

/// Wait before asking again for a room list that failed while messages for
/// unknown rooms are held.
pub const ROOM_REFRESH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// I/O the bridge asks its driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Subscribe to the transport and connect. Report the outcome with
    /// [`Bridge::transport_opened`] or [`Bridge::transport_failed`].
    OpenTransport {
        /// Attempt generation.
        generation: u64,
        /// Credentials to present.
        session: AuthSession,
    },

    /// Abort any connect or send in progress and close the transport.
    CloseTransport {
        /// Reason for closing.
        reason: String,
    },

    /// Send an encoded request. Report with [`Bridge::send_completed`].
    Transmit {
        /// Local message being sent.
        client_id: ClientMessageId,
        /// Target room.
        room_id: RoomId,
        /// Encoded [`ClientRequest`].
        payload: Vec<u8>,
    },

    /// Fetch the room list. Report with [`Bridge::rooms_fetched`].
    RefreshRooms,

    /// Fetch a page of history. Report with [`Bridge::history_fetched`].
    FetchHistory {
        /// Room to page through.
        room_id: RoomId,
        /// Upper bound (exclusive).
        before: Option<MessageCursor>,
        /// Page size.
        limit: usize,
    },

    /// Publish a new health snapshot.
    Health(ConnectionHealth),

    /// Broadcast a notification.
    Publish(SessionEvent),
}

/// Bridge between the connection manager and the message reconciler.
///
/// Generic over Environment to support both production and simulation.
pub struct Bridge<E: Environment> {
    env: E,
    connection: ConnectionManager<E::Instant>,
    reconciler: Reconciler,
    session: Option<AuthSession>,
    read_model: ReadModel,
    read_model_updated: bool,
    dirty_rooms: bool,
    dirty_messages: BTreeSet<RoomId>,
    room_retry_at: Option<E::Instant>,
}

impl<E: Environment> Bridge<E> {
    /// Create a bridge from the initial signal values.
    ///
    /// # Errors
    ///
    /// - `ConfigError` if either configuration is invalid
    pub fn new(
        env: E,
        connection_config: ConnectionConfig,
        reconciler_config: ReconcilerConfig,
        signals: LifecycleSnapshot,
        session: Option<AuthSession>,
    ) -> Result<Self, ConfigError> {
        let signals = LifecycleSnapshot {
            user_id: session.as_ref().map(|s| s.user_id.clone()),
            ..signals
        };
        let connection = ConnectionManager::new(connection_config, signals)?;
        let mut reconciler = Reconciler::new(reconciler_config)?;
        reconciler.set_self_id(session.as_ref().map(|s| s.user_id.clone()));

        Ok(Self {
            env,
            connection,
            reconciler,
            session,
            read_model: ReadModel::default(),
            read_model_updated: false,
            dirty_rooms: false,
            dirty_messages: BTreeSet::new(),
            room_retry_at: None,
        })
    }

    /// Environment in use.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Current health snapshot.
    pub fn health(&self) -> ConnectionHealth {
        self.connection.health()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// The underlying reconciler, for inspection.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Current read model.
    pub fn read_model(&self) -> &ReadModel {
        &self.read_model
    }

    /// Read model if it changed since the last call.
    pub fn take_read_model(&mut self) -> Option<ReadModel> {
        if !self.read_model_updated {
            return None;
        }
        self.read_model_updated = false;
        Some(self.read_model.clone())
    }

    /// When [`Bridge::tick`] next has work to do.
    pub fn next_wakeup(&self) -> Option<E::Instant> {
        match (self.connection.next_wakeup(), self.room_retry_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Connect if the initial signals allow it.
    pub fn start(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        let actions = self.connection.start(&self.env);
        self.process_connection(actions, &mut effects);
        self.finish(effects)
    }

    /// Fire due timers.
    pub fn tick(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        let actions = self.connection.handle(&self.env, ConnectionEvent::Tick);
        self.process_connection(actions, &mut effects);

        if self.room_retry_at.is_some_and(|at| at <= self.env.now()) {
            self.room_retry_at = None;
            debug!(buffered = self.reconciler.buffered_count(), "retrying room list");
            let actions = self.reconciler.retry_room_refresh();
            self.process_reconciler(actions, &mut effects);
        }
        self.finish(effects)
    }

    /// Network reachability changed.
    pub fn network_changed(&mut self, online: bool) -> Vec<Effect> {
        self.connection_event(ConnectionEvent::NetworkChanged(online))
    }

    /// App lifecycle changed.
    pub fn lifecycle_changed(&mut self, app: AppLifecycle) -> Vec<Effect> {
        self.connection_event(ConnectionEvent::LifecycleChanged(app))
    }

    /// Auth provider published a session, or `None` after sign-out or a
    /// failed token refresh.
    ///
    /// Losing the session keeps the cache and outbox so sends made meanwhile
    /// are delivered once a session returns. A different user clears both.
    pub fn auth_changed(&mut self, session: Option<AuthSession>) -> Vec<Effect> {
        let mut effects = Vec::new();

        if let Some(next) = &session {
            let switched = self.reconciler.self_id().is_some_and(|current| current != &next.user_id);
            if switched {
                info!(user_id = %next.user_id, "user changed, clearing cache");
                let actions = self.reconciler.clear();
                self.process_reconciler(actions, &mut effects);
            }
            self.reconciler.set_self_id(Some(next.user_id.clone()));
        }

        let user_id = session.as_ref().map(|s| s.user_id.clone());
        self.session = session;

        let actions = self.connection.handle(&self.env, ConnectionEvent::AuthChanged(user_id));
        self.process_connection(actions, &mut effects);
        self.finish(effects)
    }

    /// Connect for `generation` succeeded.
    pub fn transport_opened(&mut self, generation: u64) -> Vec<Effect> {
        self.connection_event(ConnectionEvent::TransportOpened { generation })
    }

    /// Connect for `generation` failed.
    pub fn transport_failed(&mut self, generation: u64, error: TransportError) -> Vec<Effect> {
        self.connection_event(ConnectionEvent::TransportFailed { generation, error })
    }

    /// The open channel went down.
    pub fn transport_closed(&mut self, error: TransportError) -> Vec<Effect> {
        self.connection_event(ConnectionEvent::TransportClosed { error })
    }

    /// Inbound payload from the transport.
    ///
    /// Undecodable payloads are dropped and logged.
    pub fn payload_received(&mut self, bytes: &[u8]) -> Vec<Effect> {
        match ServerEvent::decode(bytes) {
            Ok(ServerEvent::Message(message)) => {
                let mut effects = Vec::new();
                let actions = self.connection.record_message_received();
                self.process_connection(actions, &mut effects);
                let actions = self.reconciler.handle_inbound(message);
                self.process_reconciler(actions, &mut effects);
                self.finish(effects)
            },
            Ok(ServerEvent::Disconnect { reason }) => {
                info!(%reason, "server requested disconnect");
                self.transport_closed(TransportError::ServerClosed(reason))
            },
            Err(error) => {
                warn!(%error, len = bytes.len(), "dropping undecodable payload");
                Vec::new()
            },
        }
    }

    /// Transport finished sending `client_id`.
    pub fn send_completed(
        &mut self,
        client_id: ClientMessageId,
        outcome: Result<Option<SendAck>, TransportError>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let auth_error = outcome.as_ref().err().filter(|e| e.is_auth()).cloned();

        let actions = self.reconciler.handle_send_outcome(client_id, outcome);
        self.process_reconciler(actions, &mut effects);

        if let Some(error) = auth_error {
            if self.connection.state() == ConnectionState::Connected {
                effects.push(Effect::CloseTransport { reason: "credentials rejected".to_string() });
                let actions =
                    self.connection.handle(&self.env, ConnectionEvent::TransportClosed { error });
                self.process_connection(actions, &mut effects);
            }
        }
        self.finish(effects)
    }

    /// Room list request finished.
    pub fn rooms_fetched(&mut self, result: Result<Vec<WireRoom>, DirectoryError>) -> Vec<Effect> {
        let mut effects = Vec::new();
        match result {
            Ok(rooms) => {
                self.room_retry_at = None;
                debug!(rooms = rooms.len(), "room list refreshed");
                let actions = self.reconciler.apply_room_list(rooms);
                self.process_reconciler(actions, &mut effects);
            },
            Err(error) => {
                warn!(%error, "room list refresh failed");
                if self.reconciler.room_refresh_failed() {
                    self.room_retry_at = Some(self.env.now() + ROOM_REFRESH_RETRY_DELAY);
                }
            },
        }
        self.finish(effects)
    }

    /// History request finished.
    pub fn history_fetched(
        &mut self,
        room_id: &RoomId,
        result: Result<HistoryPage, DirectoryError>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        match result {
            Ok(page) => {
                let actions = self.reconciler.apply_history(page);
                self.process_reconciler(actions, &mut effects);
            },
            Err(error) => {
                warn!(%room_id, %error, "history fetch failed");
                self.reconciler.history_failed(room_id);
            },
        }
        self.finish(effects)
    }

    /// Optimistically send a message.
    ///
    /// Returns the placeholder immediately; it is transmitted as soon as the
    /// channel is up and nothing else is in flight.
    pub fn send_message(
        &mut self,
        room_id: RoomId,
        body: String,
        kind: MessageKind,
    ) -> Result<(Message, Vec<Effect>), ReconcileError> {
        let client_id = ClientMessageId::from_random_bytes(self.env.random_id_bytes());
        let now_ms = self.env.wall_clock_millis();

        let (message, actions) = self.reconciler.send(room_id, body, kind, client_id, now_ms)?;

        let mut effects = Vec::new();
        self.process_reconciler(actions, &mut effects);
        Ok((message, self.finish(effects)))
    }

    /// Re-queue a failed message.
    pub fn retry_message(&mut self, client_id: ClientMessageId) -> Result<Vec<Effect>, ReconcileError> {
        let actions = self.reconciler.retry(client_id)?;
        Ok(self.reconciler_result(actions))
    }

    /// Remove a failed message.
    pub fn discard_message(
        &mut self,
        client_id: ClientMessageId,
    ) -> Result<Vec<Effect>, ReconcileError> {
        let actions = self.reconciler.discard(client_id)?;
        Ok(self.reconciler_result(actions))
    }

    /// Request the next older page of a room's history.
    pub fn load_older(&mut self, room_id: &RoomId) -> Result<Vec<Effect>, ReconcileError> {
        let actions = self.reconciler.request_older(room_id)?;
        Ok(self.reconciler_result(actions))
    }

    /// Mark a room's messages as read.
    pub fn mark_read(&mut self, room_id: &RoomId) -> Result<Vec<Effect>, ReconcileError> {
        let actions = self.reconciler.mark_read(room_id)?;
        Ok(self.reconciler_result(actions))
    }

    /// Refresh the room list.
    pub fn refresh_rooms(&mut self) -> Vec<Effect> {
        vec![Effect::RefreshRooms]
    }

    /// Explicit logout: disconnect and clear the cache and outbox.
    pub fn logout(&mut self) -> Vec<Effect> {
        self.session = None;
        self.connection_event(ConnectionEvent::Logout)
    }

    /// App teardown.
    pub fn shutdown(&mut self) -> Vec<Effect> {
        self.connection_event(ConnectionEvent::Shutdown)
    }

    fn connection_event(&mut self, event: ConnectionEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        let actions = self.connection.handle(&self.env, event);
        self.process_connection(actions, &mut effects);
        self.finish(effects)
    }

    fn reconciler_result(&mut self, actions: Vec<ReconcilerAction>) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.process_reconciler(actions, &mut effects);
        self.finish(effects)
    }

    fn process_connection(&mut self, actions: Vec<ConnectionAction>, effects: &mut Vec<Effect>) {
        for action in actions {
            match action {
                ConnectionAction::Open { generation } => match &self.session {
                    Some(session) => {
                        effects.push(Effect::OpenTransport { generation, session: session.clone() });
                    },
                    None => warn!(generation, "open requested without a session"),
                },
                ConnectionAction::Close { reason } => {
                    effects.push(Effect::CloseTransport { reason });
                    let actions = self.reconciler.abort_in_flight();
                    self.process_reconciler(actions, effects);
                },
                ConnectionAction::FlushOutbox => {
                    info!(queued = self.reconciler.outbox().len(), "channel up, flushing outbox");
                    // Pick up anything missed while disconnected
                    effects.push(Effect::RefreshRooms);
                },
                ConnectionAction::ClearOutbox => {
                    let actions = self.reconciler.clear();
                    self.reconciler.set_self_id(None);
                    self.process_reconciler(actions, effects);
                },
                ConnectionAction::AuthRequired => {
                    effects.push(Effect::Publish(SessionEvent::AuthRequired));
                },
                ConnectionAction::HealthChanged(health) => {
                    effects.push(Effect::Health(health.clone()));
                    effects.push(Effect::Publish(SessionEvent::HealthChanged(health)));
                },
            }
        }
    }

    fn process_reconciler(&mut self, actions: Vec<ReconcilerAction>, effects: &mut Vec<Effect>) {
        for action in actions {
            match action {
                ReconcilerAction::RefreshRooms => effects.push(Effect::RefreshRooms),
                ReconcilerAction::FetchHistory { room_id, before, limit } => {
                    effects.push(Effect::FetchHistory { room_id, before, limit });
                },
                ReconcilerAction::RoomsChanged => self.dirty_rooms = true,
                ReconcilerAction::MessagesChanged { room_id } => {
                    self.dirty_messages.insert(room_id);
                },
                ReconcilerAction::SendFailed { room_id, client_id, reason } => {
                    effects.push(Effect::Publish(SessionEvent::SendFailed {
                        room_id,
                        client_id,
                        reason,
                    }));
                },
                ReconcilerAction::OutboxOverflow { dropped } => {
                    let actions = self.connection.record_dropped_sends(dropped);
                    self.process_connection(actions, effects);
                    effects.push(Effect::Publish(SessionEvent::OutboxOverflow { dropped }));
                },
            }
        }
    }

    /// Hand the next queued send to the transport if the channel is up.
    fn pump(&mut self, effects: &mut Vec<Effect>) {
        while self.connection.state() == ConnectionState::Connected {
            let Some(outgoing) = self.reconciler.next_transmit() else { return };
            let client_id = outgoing.client_id;
            let room_id = outgoing.room_id.clone();

            match ClientRequest::SendMessage(outgoing).encode() {
                Ok(payload) => {
                    effects.push(Effect::Transmit { client_id, room_id, payload });
                    return;
                },
                Err(error) => {
                    warn!(%client_id, %error, "cannot encode send");
                    let actions = self
                        .reconciler
                        .handle_send_outcome(client_id, Err(TransportError::Rejected(error.to_string())));
                    self.process_reconciler(actions, effects);
                },
            }
        }
    }

    /// Pump the outbox and republish whatever changed.
    fn finish(&mut self, mut effects: Vec<Effect>) -> Vec<Effect> {
        self.pump(&mut effects);

        if !self.dirty_rooms && self.dirty_messages.is_empty() {
            return effects;
        }

        // Unread counts move with message changes, so summaries are always
        // re-projected
        let previous = self.read_model.rooms();
        self.read_model.project_rooms(&self.reconciler);
        if std::mem::take(&mut self.dirty_rooms) {
            self.read_model.retain_known(&self.reconciler);
        }
        if *previous != *self.read_model.rooms() {
            effects.push(Effect::Publish(SessionEvent::RoomsChanged));
        }

        for room_id in std::mem::take(&mut self.dirty_messages) {
            self.read_model.project_room(&self.reconciler, &room_id);
            effects.push(Effect::Publish(SessionEvent::MessagesChanged { room_id }));
        }

        self.read_model_updated = true;
        effects
    }
}
