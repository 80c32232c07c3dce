//! Identifier newtypes.
//!
//! Server-assigned identities are opaque strings. The only id a client mints
//! itself is [`ClientMessageId`], which rides along with a send so the echo
//! can be matched back to its optimistic placeholder.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True if the identifier is the empty string.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Stable, server-assigned room identity.
    RoomId
);

string_id!(
    /// Authenticated user identity.
    UserId
);

string_id!(
    /// Message identity.
    ///
    /// Confirmed messages carry the id assigned by the backend. Optimistic
    /// placeholders carry a `local:`-prefixed id derived from their
    /// [`ClientMessageId`] so the two can never collide.
    MessageId
);

impl MessageId {
    /// Prefix for ids of locally-optimistic messages.
    pub const LOCAL_PREFIX: &'static str = "local:";

    /// Placeholder id for a locally-initiated send.
    pub fn local(client_id: ClientMessageId) -> Self {
        Self(format!("{}{}", Self::LOCAL_PREFIX, client_id.0))
    }

    /// True if this id was minted locally and not by the backend.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0.starts_with(Self::LOCAL_PREFIX)
    }
}

/// Client-generated id attached to every outgoing message.
///
/// The backend echoes it back on the confirmed message, which makes
/// reconciliation deterministic instead of relying on content matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientMessageId(Uuid);

impl ClientMessageId {
    /// Build a v4 UUID from caller-provided entropy.
    ///
    /// Entropy comes from the environment so simulations stay reproducible.
    pub fn from_random_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ClientMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for ClientMessageId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Message content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// Image reference (body holds the URL or upload key).
    Image,
    /// File reference (body holds the URL or upload key).
    File,
}

/// Position of a message in a room's ordering.
///
/// Rooms are ordered ascending by timestamp, ties broken by id. The derived
/// `Ord` compares fields in declaration order, which is exactly that rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageCursor {
    /// Unix milliseconds.
    pub timestamp_ms: u64,
    /// Tie-breaker.
    pub id: MessageId,
}

impl MessageCursor {
    /// Cursor at the given position.
    pub fn new(timestamp_ms: u64, id: MessageId) -> Self {
        Self { timestamp_ms, id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_are_distinguishable() {
        let client_id = ClientMessageId::from_random_bytes([7; 16]);
        let local = MessageId::local(client_id);

        assert!(local.is_local());
        assert!(local.as_str().ends_with(&client_id.to_string()));
        assert!(!MessageId::from("65f1c0ffee").is_local());
    }

    #[test]
    fn client_ids_are_v4() {
        let client_id = ClientMessageId::from_random_bytes([0xAB; 16]);
        assert_eq!(client_id.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn cursor_orders_by_time_then_id() {
        let a = MessageCursor::new(10, MessageId::from("b"));
        let b = MessageCursor::new(10, MessageId::from("c"));
        let c = MessageCursor::new(11, MessageId::from("a"));

        assert!(a < b);
        assert!(b < c);
    }
}
