//! Chat sync protocol types.
//!
//! Identifiers shared by every layer of the sync core, and the CBOR payloads
//! exchanged with the messaging backend. The transport moves opaque bytes;
//! only this crate knows how to turn them into typed events.
//!
//! # Components
//!
//! - [`RoomId`], [`UserId`], [`MessageId`], [`ClientMessageId`]: identities
//! - [`ServerEvent`]: everything the backend pushes to a client
//! - [`ClientRequest`]: everything a client sends on the realtime channel
//! - [`WireRoom`], [`HistoryPage`]: request/response bodies of the room
//!   directory

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
mod ids;
pub mod payloads;

pub use errors::{Result, WireError};
pub use ids::{ClientMessageId, MessageCursor, MessageId, MessageKind, RoomId, UserId};
pub use payloads::{
    ClientRequest, HistoryPage, SendAck, ServerEvent, WireMessage, WireRoom,
    client::OutgoingMessage,
};
