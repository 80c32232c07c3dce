//! Transport contract.
//!
//! The [`Transport`] trait is the only path to the network for chat. It is
//! polymorphic over the wire mechanism (websocket, long-poll, SDK socket);
//! the concrete implementation is supplied by the embedding app.

use std::future::Future;

use chatsync_core::{AuthSession, TransportError};
use chatsync_proto::{RoomId, SendAck};
use tokio::sync::mpsc;

/// Events pushed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Encoded [`chatsync_proto::ServerEvent`].
    Payload(Vec<u8>),

    /// The open channel went down.
    ///
    /// Server-initiated disconnects use [`TransportError::ServerClosed`];
    /// socket loss uses a transient error.
    Closed(TransportError),
}

/// One logical bidirectional channel to the messaging backend.
///
/// The session never calls `connect` while a previous `connect` is
/// outstanding, and drops the pending future to abort it.
///
/// # Implementations
///
/// - **Production**: wraps the backend's realtime socket
/// - **Simulation**: `chatsync_harness::SimTransport` with scripted outcomes
pub trait Transport: Send + Sync + 'static {
    /// Open the channel with the given credentials.
    ///
    /// # Errors
    ///
    /// - `TransportError::Unauthorized` if the token is rejected
    /// - a transient error if the backend is unreachable
    fn connect(
        &self,
        session: &AuthSession,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Close the channel. Idempotent.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    /// Send an encoded [`chatsync_proto::ClientRequest`].
    ///
    /// Returns the backend's synchronous ack, or `None` if the backend only
    /// acknowledges by echoing the message.
    fn send(
        &self,
        room_id: &RoomId,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<Option<SendAck>, TransportError>> + Send;

    /// Subscribe to inbound events.
    ///
    /// Each call replaces the previous subscription; events go to the most
    /// recent receiver. Unsubscribing is dropping the receiver.
    fn subscribe(&self) -> mpsc::Receiver<TransportEvent>;
}
