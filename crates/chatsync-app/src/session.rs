//! Async session runtime.
//!
//! The [`Session`] task owns the [`Bridge`] and is the only place that
//! touches the [`Transport`] and the [`RoomDirectory`]. It multiplexes
//! lifecycle signals, UI commands, transport events and request completions
//! into bridge calls, and executes the resulting [`Effect`]s.
//!
//! Because a single task applies every change, merges for a room are
//! serialized and readers only ever see whole [`ReadModel`] snapshots.

use std::{future::pending, sync::Arc, time::Duration};

use chatsync_client::{Message, ReconcileError, ReconcilerConfig};
use chatsync_core::{
    AppLifecycle, AuthSession, ConfigError, ConnectionConfig, ConnectionHealth, Environment,
    TransportError,
};
use chatsync_proto::{
    ClientMessageId, HistoryPage, MessageCursor, MessageKind, RoomId, SendAck, WireRoom,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::{JoinError, JoinHandle, JoinSet},
};
use tracing::{debug, error, info, warn};

use crate::{
    Bridge, DirectoryError, Effect, LifecycleSignals, MessagePage, ReadModel, RoomDirectory,
    RoomSummary, SessionEvent, Transport, TransportEvent,
};

/// Default time allowed for one transport send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Default capacity of the session event broadcast.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Commands queued by handles before the session task picks them up.
const COMMAND_CAPACITY: usize = 64;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connection manager settings.
    pub connection: ConnectionConfig,
    /// Reconciler settings.
    pub reconciler: ReconcilerConfig,
    /// Time allowed for one transport send before it counts as a timeout.
    pub send_timeout: Duration,
    /// Capacity of the event broadcast. Slow subscribers lag past this.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            reconciler: ReconcilerConfig::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Check every value.
    ///
    /// # Errors
    ///
    /// - `ConfigError` for the first invalid value found
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        self.reconciler.validate()?;
        if self.send_timeout.is_zero() {
            return Err(ConfigError::Zero("send_timeout"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Zero("event_capacity"));
        }
        Ok(())
    }
}

/// Errors returned by [`SessionHandle`] calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The request was refused by the cache.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// The session task has ended.
    #[error("session closed")]
    Closed,
}

type Reply<T> = oneshot::Sender<Result<T, ReconcileError>>;

#[derive(Debug)]
enum Command {
    Send { room_id: RoomId, body: String, kind: MessageKind, reply: Reply<Message> },
    Retry { client_id: ClientMessageId, reply: Reply<()> },
    Discard { client_id: ClientMessageId, reply: Reply<()> },
    LoadOlder { room_id: RoomId, reply: Reply<()> },
    MarkRead { room_id: RoomId, reply: Reply<()> },
    RefreshRooms { reply: oneshot::Sender<()> },
    Logout { reply: oneshot::Sender<()> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// What woke the session loop.
enum Wake {
    Command(Option<Command>),
    Network(bool),
    Lifecycle(AppLifecycle),
    Auth(Option<AuthSession>),
    Inbound(Option<TransportEvent>),
    Connected(u64, Result<Result<(), TransportError>, JoinError>),
    Sent(ClientMessageId, Result<Result<Option<SendAck>, TransportError>, JoinError>),
    Rooms(Result<Result<Vec<WireRoom>, DirectoryError>, JoinError>),
    History(Result<(RoomId, Result<HistoryPage, DirectoryError>), JoinError>),
    Tick,
    Idle,
}

/// Session task state.
///
/// Created and started with [`Session::spawn`]; interact with it through
/// the returned [`SessionHandle`].
pub struct Session<E: Environment, T: Transport, D: RoomDirectory> {
    bridge: Bridge<E>,
    transport: Arc<T>,
    directory: Arc<D>,
    signals: LifecycleSignals,
    send_timeout: Duration,

    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<SessionEvent>,
    health: watch::Sender<ConnectionHealth>,
    read_model: watch::Sender<ReadModel>,

    network_open: bool,
    lifecycle_open: bool,
    auth_open: bool,

    inbound: Option<mpsc::Receiver<TransportEvent>>,
    connect: Option<(u64, JoinHandle<Result<(), TransportError>>)>,
    send: Option<(ClientMessageId, JoinHandle<Result<Option<SendAck>, TransportError>>)>,
    rooms: Option<JoinHandle<Result<Vec<WireRoom>, DirectoryError>>>,
    history: JoinSet<(RoomId, Result<HistoryPage, DirectoryError>)>,
}

impl<E: Environment, T: Transport, D: RoomDirectory> Session<E, T, D> {
    /// Start a session task on the current tokio runtime.
    ///
    /// The session connects as soon as the signals allow it.
    ///
    /// # Errors
    ///
    /// - `SessionError::Config` if the configuration is invalid
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(
        env: E,
        transport: Arc<T>,
        directory: Arc<D>,
        mut signals: LifecycleSignals,
        config: SessionConfig,
    ) -> Result<SessionHandle, SessionError> {
        config.validate()?;

        let (snapshot, auth) = signals.snapshot();
        let bridge = Bridge::new(env, config.connection, config.reconciler, snapshot, auth)?;

        let (command_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(config.event_capacity);
        let (health, health_rx) = watch::channel(bridge.health());
        let (read_model, read_model_rx) = watch::channel(ReadModel::default());

        let session = Self {
            bridge,
            transport,
            directory,
            signals,
            send_timeout: config.send_timeout,
            commands,
            events: events.clone(),
            health,
            read_model,
            network_open: true,
            lifecycle_open: true,
            auth_open: true,
            inbound: None,
            connect: None,
            send: None,
            rooms: None,
            history: JoinSet::new(),
        };
        tokio::spawn(session.run());

        Ok(SessionHandle {
            commands: command_tx,
            health: health_rx,
            read_model: read_model_rx,
            events,
        })
    }

    async fn run(mut self) {
        info!("session started");
        let effects = self.bridge.start();
        self.apply(effects).await;

        loop {
            let delay = self.bridge.next_wakeup().map(|at| {
                let now = self.bridge.env().now();
                if at > now { at - now } else { Duration::ZERO }
            });

            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                changed = self.signals.network.changed(), if self.network_open => match changed {
                    Ok(()) => Wake::Network(*self.signals.network.borrow_and_update()),
                    Err(_) => {
                        self.network_open = false;
                        Wake::Idle
                    },
                },
                changed = self.signals.lifecycle.changed(), if self.lifecycle_open => match changed {
                    Ok(()) => Wake::Lifecycle(*self.signals.lifecycle.borrow_and_update()),
                    Err(_) => {
                        self.lifecycle_open = false;
                        Wake::Idle
                    },
                },
                changed = self.signals.auth.changed(), if self.auth_open => match changed {
                    Ok(()) => Wake::Auth(self.signals.auth.borrow_and_update().clone()),
                    Err(_) => {
                        self.auth_open = false;
                        Wake::Idle
                    },
                },
                event = recv_opt(&mut self.inbound) => Wake::Inbound(event),
                (generation, result) = join_keyed(&mut self.connect) => Wake::Connected(generation, result),
                (client_id, result) = join_keyed(&mut self.send) => Wake::Sent(client_id, result),
                result = join_opt(&mut self.rooms) => Wake::Rooms(result),
                Some(result) = self.history.join_next(), if !self.history.is_empty() => Wake::History(result),
                () = sleep_opt(self.bridge.env(), delay) => Wake::Tick,
            };

            let effects = match wake {
                Wake::Command(Some(command)) => {
                    if self.command(command).await {
                        break;
                    }
                    continue;
                },
                Wake::Command(None) => {
                    debug!("all handles dropped");
                    let effects = self.bridge.shutdown();
                    self.apply(effects).await;
                    break;
                },
                Wake::Network(online) => self.bridge.network_changed(online),
                Wake::Lifecycle(app) => self.bridge.lifecycle_changed(app),
                Wake::Auth(session) => self.bridge.auth_changed(session),
                Wake::Inbound(Some(TransportEvent::Payload(bytes))) => {
                    self.bridge.payload_received(&bytes)
                },
                Wake::Inbound(Some(TransportEvent::Closed(error))) => {
                    self.inbound = None;
                    self.bridge.transport_closed(error)
                },
                Wake::Inbound(None) => {
                    self.inbound = None;
                    self.bridge.transport_closed(TransportError::Closed)
                },
                Wake::Connected(generation, result) => {
                    self.connect = None;
                    match result.unwrap_or_else(|e| Err(task_failed(&e))) {
                        Ok(()) => self.bridge.transport_opened(generation),
                        Err(error) => self.bridge.transport_failed(generation, error),
                    }
                },
                Wake::Sent(client_id, result) => {
                    self.send = None;
                    let outcome = result.unwrap_or_else(|e| Err(task_failed(&e)));
                    self.bridge.send_completed(client_id, outcome)
                },
                Wake::Rooms(result) => {
                    self.rooms = None;
                    let result = result
                        .unwrap_or_else(|e| Err(DirectoryError::Unavailable(e.to_string())));
                    self.bridge.rooms_fetched(result)
                },
                Wake::History(Ok((room_id, result))) => {
                    self.bridge.history_fetched(&room_id, result)
                },
                Wake::History(Err(e)) => {
                    error!(error = %e, "history task failed");
                    Vec::new()
                },
                Wake::Tick => self.bridge.tick(),
                Wake::Idle => Vec::new(),
            };
            self.apply(effects).await;
        }

        self.abort_tasks();
        info!("session ended");
    }

    /// Execute a command. Returns true when the session should end.
    async fn command(&mut self, command: Command) -> bool {
        match command {
            Command::Send { room_id, body, kind, reply } => {
                let result = match self.bridge.send_message(room_id, body, kind) {
                    Ok((message, effects)) => {
                        self.apply(effects).await;
                        Ok(message)
                    },
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            },
            Command::Retry { client_id, reply } => {
                let result = self.bridge.retry_message(client_id);
                self.reply(result, reply).await;
            },
            Command::Discard { client_id, reply } => {
                let result = self.bridge.discard_message(client_id);
                self.reply(result, reply).await;
            },
            Command::LoadOlder { room_id, reply } => {
                let result = self.bridge.load_older(&room_id);
                self.reply(result, reply).await;
            },
            Command::MarkRead { room_id, reply } => {
                let result = self.bridge.mark_read(&room_id);
                self.reply(result, reply).await;
            },
            Command::RefreshRooms { reply } => {
                let effects = self.bridge.refresh_rooms();
                self.apply(effects).await;
                let _ = reply.send(());
            },
            Command::Logout { reply } => {
                info!("logout requested");
                let effects = self.bridge.logout();
                self.apply(effects).await;
                // Sign-in after logout arrives through the auth signal
                let _ = reply.send(());
            },
            Command::Shutdown { reply } => {
                info!("shutdown requested");
                let effects = self.bridge.shutdown();
                self.apply(effects).await;
                self.abort_tasks();
                let _ = reply.send(());
                return true;
            },
        }
        false
    }

    async fn reply(&mut self, result: Result<Vec<Effect>, ReconcileError>, reply: Reply<()>) {
        let result = match result {
            Ok(effects) => {
                self.apply(effects).await;
                Ok(())
            },
            Err(e) => Err(e),
        };
        let _ = reply.send(result);
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        // Publish the snapshot first so notified readers see the new data
        if let Some(model) = self.bridge.take_read_model() {
            self.read_model.send_replace(model);
        }

        for effect in effects {
            match effect {
                Effect::OpenTransport { generation, session } => {
                    debug!(generation, "opening transport");
                    if let Some((_, task)) = self.connect.take() {
                        task.abort();
                    }
                    self.inbound = Some(self.transport.subscribe());

                    let transport = Arc::clone(&self.transport);
                    let task = tokio::spawn(async move { transport.connect(&session).await });
                    self.connect = Some((generation, task));
                },
                Effect::CloseTransport { reason } => {
                    debug!(%reason, "closing transport");
                    if let Some((_, task)) = self.connect.take() {
                        task.abort();
                    }
                    if let Some((_, task)) = self.send.take() {
                        task.abort();
                    }
                    self.inbound = None;
                    self.transport.disconnect().await;
                },
                Effect::Transmit { client_id, room_id, payload } => {
                    if let Some((previous, task)) = self.send.take() {
                        warn!(%previous, "replacing unfinished send");
                        task.abort();
                    }
                    let transport = Arc::clone(&self.transport);
                    let timeout = self.send_timeout;
                    let task = tokio::spawn(async move {
                        tokio::time::timeout(timeout, transport.send(&room_id, payload))
                            .await
                            .unwrap_or(Err(TransportError::Timeout { elapsed: timeout }))
                    });
                    self.send = Some((client_id, task));
                },
                Effect::RefreshRooms => {
                    if self.rooms.is_none() {
                        let directory = Arc::clone(&self.directory);
                        self.rooms = Some(tokio::spawn(async move { directory.fetch_rooms().await }));
                    }
                },
                Effect::FetchHistory { room_id, before, limit } => {
                    let directory = Arc::clone(&self.directory);
                    self.history.spawn(async move {
                        let result = directory.fetch_history(&room_id, before, limit).await;
                        (room_id, result)
                    });
                },
                Effect::Health(health) => {
                    self.health.send_replace(health);
                },
                Effect::Publish(event) => {
                    // No subscribers is fine
                    let _ = self.events.send(event);
                },
            }
        }
    }

    fn abort_tasks(&mut self) {
        if let Some((_, task)) = self.connect.take() {
            task.abort();
        }
        if let Some((_, task)) = self.send.take() {
            task.abort();
        }
        if let Some(task) = self.rooms.take() {
            task.abort();
        }
        self.history.abort_all();
        self.inbound = None;
    }
}

fn task_failed(error: &JoinError) -> TransportError {
    error!(%error, "transport task failed");
    TransportError::Io(error.to_string())
}

async fn recv_opt(inbound: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn join_keyed<K: Copy, V>(
    task: &mut Option<(K, JoinHandle<V>)>,
) -> (K, Result<V, JoinError>) {
    match task {
        Some((key, handle)) => {
            let key = *key;
            (key, handle.await)
        },
        None => pending().await,
    }
}

async fn join_opt<V>(task: &mut Option<JoinHandle<V>>) -> Result<V, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

async fn sleep_opt<E: Environment>(env: &E, delay: Option<Duration>) {
    match delay {
        Some(delay) => env.sleep(delay).await,
        None => pending().await,
    }
}

/// UI-facing handle to a running session.
///
/// Cheap to clone. Reads come from the latest published snapshot and never
/// wait on the session task; commands are queued to it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    health: watch::Receiver<ConnectionHealth>,
    read_model: watch::Receiver<ReadModel>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Current connection health.
    #[must_use]
    pub fn connection_health(&self) -> ConnectionHealth {
        self.health.borrow().clone()
    }

    /// Current read model snapshot.
    #[must_use]
    pub fn read_model(&self) -> ReadModel {
        self.read_model.borrow().clone()
    }

    /// Rooms sorted by recency, newest first.
    #[must_use]
    pub fn rooms(&self) -> Arc<[RoomSummary]> {
        self.read_model.borrow().rooms()
    }

    /// A room's cached messages, oldest first.
    #[must_use]
    pub fn messages(&self, room_id: &RoomId) -> Option<Arc<[Message]>> {
        self.read_model.borrow().messages(room_id)
    }

    /// Up to `limit` cached messages strictly older than `before`.
    #[must_use]
    pub fn messages_page(
        &self,
        room_id: &RoomId,
        before: Option<MessageCursor>,
        limit: usize,
    ) -> Option<MessagePage> {
        self.read_model.borrow().messages_page(room_id, before.as_ref(), limit)
    }

    /// Subscribe to change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Watch health snapshots.
    #[must_use]
    pub fn watch_health(&self) -> watch::Receiver<ConnectionHealth> {
        self.health.clone()
    }

    /// Watch read model snapshots.
    #[must_use]
    pub fn watch_read_model(&self) -> watch::Receiver<ReadModel> {
        self.read_model.clone()
    }

    /// Optimistically send a message.
    ///
    /// Returns the pending placeholder as soon as it is in the cache; the
    /// network round trip happens in the background. Connection problems
    /// never fail this call.
    ///
    /// # Errors
    ///
    /// - `SessionError::Reconcile` if the room is unknown or nobody is signed in
    /// - `SessionError::Closed` if the session has ended
    pub async fn send_message(
        &self,
        room_id: RoomId,
        body: impl Into<String>,
        kind: MessageKind,
    ) -> Result<Message, SessionError> {
        let body = body.into();
        self.request(|reply| Command::Send { room_id, body, kind, reply }).await
    }

    /// Re-queue a failed message.
    ///
    /// # Errors
    ///
    /// - `SessionError::Reconcile` if the message is unknown or has not failed
    /// - `SessionError::Closed` if the session has ended
    pub async fn retry_message(&self, client_id: ClientMessageId) -> Result<(), SessionError> {
        self.request(|reply| Command::Retry { client_id, reply }).await
    }

    /// Remove a failed message.
    ///
    /// # Errors
    ///
    /// - `SessionError::Reconcile` if the message is unknown or has not failed
    /// - `SessionError::Closed` if the session has ended
    pub async fn discard_message(&self, client_id: ClientMessageId) -> Result<(), SessionError> {
        self.request(|reply| Command::Discard { client_id, reply }).await
    }

    /// Fetch the next older page of a room's history.
    ///
    /// Completion is announced with [`SessionEvent::MessagesChanged`].
    ///
    /// # Errors
    ///
    /// - `SessionError::Reconcile` if the room is unknown
    /// - `SessionError::Closed` if the session has ended
    pub async fn load_older(&self, room_id: RoomId) -> Result<(), SessionError> {
        self.request(|reply| Command::LoadOlder { room_id, reply }).await
    }

    /// Mark a room as read.
    ///
    /// # Errors
    ///
    /// - `SessionError::Reconcile` if the room is unknown
    /// - `SessionError::Closed` if the session has ended
    pub async fn mark_read(&self, room_id: RoomId) -> Result<(), SessionError> {
        self.request(|reply| Command::MarkRead { room_id, reply }).await
    }

    /// Refresh the room list.
    ///
    /// # Errors
    ///
    /// - `SessionError::Closed` if the session has ended
    pub async fn refresh_rooms(&self) -> Result<(), SessionError> {
        self.notify(|reply| Command::RefreshRooms { reply }).await
    }

    /// Disconnect and clear the cache and outbox.
    ///
    /// # Errors
    ///
    /// - `SessionError::Closed` if the session has ended
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.notify(|reply| Command::Logout { reply }).await
    }

    /// Disconnect and end the session task. Idempotent.
    pub async fn shutdown(&self) {
        if self.notify(|reply| Command::Shutdown { reply }).await.is_err() {
            debug!("session already closed");
        }
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(Reply<R>) -> Command,
    ) -> Result<R, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).await.map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?.map_err(SessionError::from)
    }

    async fn notify(
        &self,
        command: impl FnOnce(oneshot::Sender<()>) -> Command,
    ) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).await.map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }
}
