//! Application layer for the chat sync core.
//!
//! Glues the sans-IO connection manager and message reconciler to real I/O,
//! and exposes the result to the UI as a read-only projection plus a
//! command handle.
//!
//! # Components
//!
//! - [`Transport`]: contract for the realtime channel (external collaborator)
//! - [`RoomDirectory`]: contract for room-list and history requests
//! - [`LifecycleSignals`]: network, app lifecycle and auth observables
//! - [`Bridge`]: pure glue between [`chatsync_core::ConnectionManager`] and
//!   [`chatsync_client::Reconciler`], producing [`Effect`]s
//! - [`ReadModel`]: denormalized projection consumed by the UI
//! - [`Session`]: async runtime executing effects with tokio
//! - [`SessionHandle`]: the UI-facing API

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod bridge;
mod directory;
mod event;
mod session;
mod signals;
mod state;
mod system_env;
mod transport;

pub use bridge::{Bridge, Effect, ROOM_REFRESH_RETRY_DELAY};
pub use chatsync_client::{DeliveryState, LastMessage, Message};
pub use chatsync_core::{AppLifecycle, AuthSession, ConnectionHealth, ConnectionState};
pub use directory::{DirectoryError, RoomDirectory};
pub use event::SessionEvent;
pub use session::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_SEND_TIMEOUT, Session, SessionConfig, SessionError,
    SessionHandle,
};
pub use signals::{LifecycleSignals, SignalSenders};
pub use state::{MessagePage, ReadModel, RoomSummary};
pub use system_env::SystemEnv;
pub use transport::{Transport, TransportEvent};
