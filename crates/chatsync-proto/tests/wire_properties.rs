//! Property-based tests for the wire codec.
//!
//! Inbound payloads are untrusted: decoding must reject garbage with an error,
//! never a panic, and anything that does decode must already be validated.

use chatsync_proto::{
    ClientMessageId, MessageId, MessageKind, RoomId, ServerEvent, UserId, WireError, WireMessage,
};
use proptest::prelude::*;

fn arbitrary_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![Just(MessageKind::Text), Just(MessageKind::Image), Just(MessageKind::File)]
}

fn arbitrary_message() -> impl Strategy<Value = WireMessage> {
    (
        "[a-f0-9]{0,24}",
        proptest::option::of(any::<[u8; 16]>()),
        "[a-z0-9]{0,8}",
        "[a-z0-9]{0,8}",
        ".{0,64}",
        arbitrary_kind(),
        any::<u64>(),
        any::<bool>(),
    )
        .prop_map(|(id, client_id, room, sender, body, kind, timestamp_ms, read)| WireMessage {
            id: MessageId::from(id),
            client_id: client_id.map(ClientMessageId::from_random_bytes),
            room_id: RoomId::from(room),
            sender_id: UserId::from(sender),
            body,
            kind,
            timestamp_ms,
            read,
        })
}

proptest! {
    #[test]
    fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = ServerEvent::decode(&bytes);
    }

    #[test]
    fn prop_decoded_events_are_valid(message in arbitrary_message()) {
        let bytes = ServerEvent::Message(message.clone()).encode().unwrap();

        match ServerEvent::decode(&bytes) {
            Ok(ServerEvent::Message(decoded)) => {
                prop_assert!(decoded.validate().is_ok());
                prop_assert_eq!(decoded, message);
            },
            Ok(other) => prop_assert!(false, "decoded into wrong variant: {other:?}"),
            Err(WireError::Malformed(_)) => {
                prop_assert!(
                    message.id.is_empty() || message.room_id.is_empty() || message.sender_id.is_empty()
                );
            },
            Err(e) => prop_assert!(false, "unexpected error: {e}"),
        }
    }
}

#[test]
fn disconnect_event_decodes() {
    let bytes = ServerEvent::Disconnect { reason: "kicked".into() }.encode().unwrap();

    assert_eq!(
        ServerEvent::decode(&bytes).unwrap(),
        ServerEvent::Disconnect { reason: "kicked".into() }
    );
}
