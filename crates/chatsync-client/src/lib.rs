//! Message cache reconciler.
//!
//! Action-based state machine that owns the authoritative in-memory view of
//! rooms and their message histories, and keeps it consistent under
//! concurrent local sends and inbound pushes.
//!
//! # Architecture
//!
//! The reconciler follows the same Sans-IO and Action-Based patterns as
//! [`chatsync_core`]. Callers feed in local intents (send, retry, discard,
//! load older) and transport outcomes (inbound messages, send results, room
//! list and history pages) and receive [`ReconcilerAction`]s to execute. It
//! never talks to the network; the outbox is drained by the caller through
//! [`Reconciler::next_transmit`].
//!
//! # Components
//!
//! - [`Reconciler`]: room/message store, optimistic sends, merge and dedup
//! - [`Outbox`]: bounded FIFO of sends waiting for the channel
//! - [`Message`], [`Room`]: the cached records
//! - [`ReconcilerAction`]: actions produced by the reconciler

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod event;
mod model;
mod outbox;
mod reconciler;

pub use error::ReconcileError;
pub use event::ReconcilerAction;
pub use model::{DeliveryState, LastMessage, Message, Room};
pub use outbox::Outbox;
pub use reconciler::{
    DEFAULT_ECHO_MATCH_WINDOW, DEFAULT_HISTORY_PAGE_SIZE, DEFAULT_MAX_SEND_ATTEMPTS,
    DEFAULT_OUTBOX_CAPACITY, DEFAULT_UNKNOWN_ROOM_BUFFER, Reconciler, ReconcilerConfig,
};
