//! Scripted in-memory transport.
//!
//! Plays the backend for one client: accepts connects (or fails them as
//! scripted), decodes sends, answers with acks and/or echoes, and lets tests
//! push messages and drop the channel at will. Every call is recorded so
//! tests can assert on what the session actually did.

use std::{
    collections::{HashSet, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chatsync_app::{Transport, TransportEvent};
use chatsync_core::{AuthSession, Environment, TransportError};
use chatsync_proto::{
    ClientRequest, MessageId, OutgoingMessage, RoomId, SendAck, ServerEvent, UserId, WireMessage,
};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::SimEnv;

/// Inbound event buffer per subscription.
const SUBSCRIPTION_CAPACITY: usize = 1024;

/// How the simulated backend answers a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    /// Synchronous ack with the assigned id, no echo.
    Ack,
    /// No ack; the message comes back as a pushed echo carrying the client id.
    Echo,
    /// Both an ack and an echo.
    #[default]
    AckAndEcho,
    /// No ack; the echo omits the client id, so only content matching can
    /// reconcile it.
    AnonymousEcho,
}

#[derive(Debug, Default)]
struct State {
    subscriber: Option<mpsc::Sender<TransportEvent>>,
    connected: bool,
    user_id: Option<UserId>,
    connect_script: VecDeque<Result<(), TransportError>>,
    connect_latency: Duration,
    handshake_drops: u32,
    revoked_tokens: HashSet<String>,
    send_failures: VecDeque<TransportError>,
    send_mode: SendMode,
    next_id: u64,
    connects_started: u64,
    connects_outstanding: u32,
    max_connects_outstanding: u32,
    disconnects: u64,
    sent: Vec<OutgoingMessage>,
}

/// Simulated realtime channel.
#[derive(Debug)]
pub struct SimTransport {
    env: SimEnv,
    state: Mutex<State>,
}

impl SimTransport {
    /// Transport that accepts every connect and acks and echoes every send.
    pub fn new(env: SimEnv) -> Self {
        Self { env, state: Mutex::new(State::default()) }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Outcomes for the next connects, in order. Later connects succeed.
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = Result<(), TransportError>>) {
        self.state().connect_script.extend(outcomes);
    }

    /// Virtual time every connect takes before resolving.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.state().connect_latency = latency;
    }

    /// The next `count` connects report success, but the channel has already
    /// died: a close is queued to the subscriber before the connect returns.
    pub fn drop_during_handshake(&self, count: u32) {
        self.state().handshake_drops += count;
    }

    /// Reject `token` from now on, on connect and on send.
    pub fn revoke_token(&self, token: impl Into<String>) {
        self.state().revoked_tokens.insert(token.into());
    }

    /// Fail the next sends with these errors, in order.
    pub fn fail_sends(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.state().send_failures.extend(errors);
    }

    /// How successful sends are answered.
    pub fn set_send_mode(&self, mode: SendMode) {
        self.state().send_mode = mode;
    }

    /// Push a server event to the current subscriber.
    ///
    /// Returns false if nobody is connected to receive it.
    pub fn push(&self, event: &ServerEvent) -> bool {
        match event.encode() {
            Ok(bytes) => self.push_raw(bytes),
            Err(error) => {
                debug!(%error, "cannot encode simulated event");
                false
            },
        }
    }

    /// Push raw bytes to the current subscriber.
    pub fn push_raw(&self, bytes: Vec<u8>) -> bool {
        let state = self.state();
        if !state.connected {
            return false;
        }
        deliver(&state, TransportEvent::Payload(bytes))
    }

    /// Push a message from another member.
    pub fn push_message(&self, room_id: &RoomId, sender_id: &UserId, body: &str) -> MessageId {
        let message = {
            let mut state = self.state();
            WireMessage {
                id: next_message_id(&mut state),
                client_id: None,
                room_id: room_id.clone(),
                sender_id: sender_id.clone(),
                body: body.to_string(),
                kind: chatsync_proto::MessageKind::Text,
                timestamp_ms: self.env.wall_clock_millis(),
                read: false,
            }
        };
        let id = message.id.clone();
        self.push(&ServerEvent::Message(message));
        id
    }

    /// Simulate socket loss.
    pub fn drop_connection(&self) {
        self.close(TransportError::Io("connection reset by peer".to_string()));
    }

    /// Simulate a server-initiated disconnect.
    pub fn server_disconnect(&self, reason: &str) {
        let reason = reason.to_string();
        let _ = self.push(&ServerEvent::Disconnect { reason: reason.clone() });
        self.close(TransportError::ServerClosed(reason));
    }

    fn close(&self, error: TransportError) {
        let mut state = self.state();
        if state.connected {
            deliver(&state, TransportEvent::Closed(error));
            state.connected = false;
        }
    }

    /// True while a channel is open.
    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Connect calls made so far.
    pub fn connects_started(&self) -> u64 {
        self.state().connects_started
    }

    /// Most connects ever outstanding at the same time.
    pub fn max_connects_outstanding(&self) -> u32 {
        self.state().max_connects_outstanding
    }

    /// Disconnect calls made so far.
    pub fn disconnects(&self) -> u64 {
        self.state().disconnects
    }

    /// Every request accepted, in arrival order.
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.state().sent.clone()
    }
}

fn deliver(state: &State, event: TransportEvent) -> bool {
    match &state.subscriber {
        Some(subscriber) => subscriber.try_send(event).is_ok(),
        None => false,
    }
}

fn next_message_id(state: &mut State) -> MessageId {
    state.next_id += 1;
    MessageId::new(format!("srv-{}", state.next_id))
}

/// Decrements the outstanding-connect counter even if the connect future is
/// dropped mid-flight.
struct Outstanding<'a>(&'a SimTransport);

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state();
        state.connects_outstanding = state.connects_outstanding.saturating_sub(1);
    }
}

impl Transport for SimTransport {
    async fn connect(&self, session: &AuthSession) -> Result<(), TransportError> {
        let latency = {
            let mut state = self.state();
            state.connects_started += 1;
            state.connects_outstanding += 1;
            state.max_connects_outstanding =
                state.max_connects_outstanding.max(state.connects_outstanding);
            state.connect_latency
        };
        let _outstanding = Outstanding(self);

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        let outcome = state.connect_script.pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() && state.revoked_tokens.contains(&session.token) {
            return Err(TransportError::Unauthorized("token revoked".to_string()));
        }
        if outcome.is_ok() && state.handshake_drops > 0 {
            state.handshake_drops -= 1;
            deliver(&state, TransportEvent::Closed(TransportError::Io("reset during handshake".to_string())));
            debug!(user_id = %session.user_id, "simulated connect on a dead channel");
            return Ok(());
        }
        if outcome.is_ok() {
            state.connected = true;
            state.user_id = Some(session.user_id.clone());
        }
        debug!(user_id = %session.user_id, ?outcome, "simulated connect");
        outcome
    }

    async fn disconnect(&self) {
        let mut state = self.state();
        state.disconnects += 1;
        state.connected = false;
        state.subscriber = None;
    }

    async fn send(
        &self,
        room_id: &RoomId,
        payload: Vec<u8>,
    ) -> Result<Option<SendAck>, TransportError> {
        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::Closed);
        }
        if let Some(error) = state.send_failures.pop_front() {
            return Err(error);
        }

        let ClientRequest::SendMessage(outgoing) =
            ClientRequest::decode(&payload).map_err(|e| TransportError::Rejected(e.to_string()))?;
        if &outgoing.room_id != room_id {
            return Err(TransportError::Rejected("room mismatch".to_string()));
        }
        let sender_id = state.user_id.clone().unwrap_or_else(|| UserId::new("anonymous"));

        let id = next_message_id(&mut state);
        let timestamp_ms = self.env.wall_clock_millis();
        trace!(%id, client_id = %outgoing.client_id, "simulated send");
        state.sent.push(outgoing.clone());

        let echo = |client_id| {
            TransportEvent::Payload(
                ServerEvent::Message(WireMessage {
                    id: id.clone(),
                    client_id,
                    room_id: outgoing.room_id.clone(),
                    sender_id: sender_id.clone(),
                    body: outgoing.body.clone(),
                    kind: outgoing.kind,
                    timestamp_ms,
                    read: true,
                })
                .encode()
                .unwrap_or_default(),
            )
        };
        let ack = SendAck { message_id: id.clone(), timestamp_ms };

        match state.send_mode {
            SendMode::Ack => Ok(Some(ack)),
            SendMode::Echo => {
                deliver(&state, echo(Some(outgoing.client_id)));
                Ok(None)
            },
            SendMode::AckAndEcho => {
                deliver(&state, echo(Some(outgoing.client_id)));
                Ok(Some(ack))
            },
            SendMode::AnonymousEcho => {
                deliver(&state, echo(None));
                Ok(None)
            },
        }
    }

    fn subscribe(&self) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        self.state().subscriber = Some(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> AuthSession {
        AuthSession::new("me", "token")
    }

    #[tokio::test]
    async fn scripted_connects_then_success() {
        let transport = SimTransport::new(SimEnv::new());
        transport.script_connects([Err(TransportError::Io("refused".into()))]);

        assert!(transport.connect(&session()).await.is_err());
        assert!(transport.connect(&session()).await.is_ok());
        assert!(transport.is_connected());
        assert_eq!(transport.connects_started(), 2);
        assert_eq!(transport.max_connects_outstanding(), 1);
    }

    #[tokio::test]
    async fn revoked_token_is_unauthorized() {
        let transport = SimTransport::new(SimEnv::new());
        transport.revoke_token("token");

        let result = transport.connect(&session()).await;
        assert!(matches!(result, Err(TransportError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn echo_reaches_subscriber() {
        let transport = SimTransport::new(SimEnv::new());
        transport.set_send_mode(SendMode::Echo);
        let mut rx = transport.subscribe();
        transport.connect(&session()).await.unwrap();

        let client_id = chatsync_proto::ClientMessageId::from_random_bytes([3; 16]);
        let request = ClientRequest::SendMessage(OutgoingMessage {
            client_id,
            room_id: RoomId::from("r1"),
            body: "hi".into(),
            kind: chatsync_proto::MessageKind::Text,
        });
        let ack = transport.send(&RoomId::from("r1"), request.encode().unwrap()).await.unwrap();
        assert!(ack.is_none());

        let Some(TransportEvent::Payload(bytes)) = rx.recv().await else {
            panic!("expected echo");
        };
        let ServerEvent::Message(echo) = ServerEvent::decode(&bytes).unwrap() else {
            panic!("expected message");
        };
        assert_eq!(echo.client_id, Some(client_id));
        assert_eq!(echo.sender_id, UserId::from("me"));
    }

    #[tokio::test]
    async fn handshake_drop_queues_close() {
        let transport = SimTransport::new(SimEnv::new());
        transport.drop_during_handshake(1);
        let mut rx = transport.subscribe();

        assert!(transport.connect(&session()).await.is_ok());
        assert!(!transport.is_connected());
        assert!(matches!(rx.recv().await, Some(TransportEvent::Closed(_))));

        assert!(transport.connect(&session()).await.is_ok());
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn send_without_connection_is_closed() {
        let transport = SimTransport::new(SimEnv::new());

        let result = transport.send(&RoomId::from("r1"), Vec::new()).await;
        assert_eq!(result, Err(TransportError::Closed));
    }
}
