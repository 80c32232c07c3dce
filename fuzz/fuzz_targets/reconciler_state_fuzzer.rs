//! Fuzz target for the message cache reconciler
//!
//! Ensure ordering, dedup and placeholder bookkeeping survive any
//! interleaving (HIGH priority)
//!
//! # Strategy
//!
//! - Multi-room: pushes and sends across listed, unlisted and removed rooms
//! - Echoes: with client id, without client id (content match), duplicated
//! - Send outcomes: acks, accepted-without-ack, transient, fatal, auth
//! - Room list churn and history pages with colliding ids
//!
//! # Invariants
//!
//! - Messages sorted by (timestamp, id) in every room
//! - No duplicate server id per room, no duplicate client id anywhere
//! - Room preview is the newest cached message
//! - At most one send in flight

#![no_main]

use arbitrary::Arbitrary;
use chatsync_client::{Reconciler, ReconcilerConfig};
use chatsync_core::TransportError;
use chatsync_harness::{InvariantRegistry, SystemSnapshot};
use chatsync_proto::{
    ClientMessageId, HistoryPage, MessageId, MessageKind, RoomId, SendAck, UserId, WireMessage,
    WireRoom,
};
use libfuzzer_sys::fuzz_target;

const ROOMS: [&str; 3] = ["a", "b", "c"];

#[derive(Debug, Clone, Arbitrary)]
enum ReconcilerOp {
    Push { room: u8, id: u8, ts: u16, from_self: bool },
    Send { room: u8, body: u8, ts: u16 },
    Transmit,
    Outcome { outcome: Outcome },
    Echo { with_client_id: bool, ts: u16 },
    Abort,
    RoomList { mask: u8 },
    History { room: u8, ids: Vec<(u8, u16)>, has_more: bool },
    Retry,
    Discard,
    MarkRead { room: u8 },
    Clear,
}

#[derive(Debug, Clone, Arbitrary)]
enum Outcome {
    Acked { id: u8, ts: u16 },
    Accepted,
    Transient,
    Rejected,
    Unauthorized,
}

fn room_id(n: u8) -> RoomId {
    RoomId::from(ROOMS[usize::from(n) % ROOMS.len()])
}

fn wire(room: u8, id: u8, ts: u16, sender: &str) -> WireMessage {
    WireMessage {
        id: MessageId::from(format!("s{id}")),
        client_id: None,
        room_id: room_id(room),
        sender_id: UserId::from(sender),
        body: format!("m{id}"),
        kind: MessageKind::Text,
        timestamp_ms: u64::from(ts),
        read: false,
    }
}

fn rooms(mask: u8) -> Vec<WireRoom> {
    ROOMS
        .iter()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, id)| WireRoom {
            id: RoomId::from(*id),
            members: vec![UserId::from("me"), UserId::from("them")],
            member_count: None,
            last_message: None,
        })
        .collect()
}

fuzz_target!(|ops: Vec<ReconcilerOp>| {
    let Ok(mut reconciler) = Reconciler::new(ReconcilerConfig::default()) else { return };
    reconciler.set_self_id(Some(UserId::from("me")));
    reconciler.apply_room_list(rooms(0b011));

    let registry = InvariantRegistry::standard();
    let mut next_client = 0u128;
    let mut in_flight: Option<(ClientMessageId, RoomId, String)> = None;
    let mut last_failed: Option<ClientMessageId> = None;

    for op in ops {
        match op {
            ReconcilerOp::Push { room, id, ts, from_self } => {
                let sender = if from_self { "me" } else { "them" };
                reconciler.handle_inbound(wire(room, id, ts, sender));
            }
            ReconcilerOp::Send { room, body, ts } => {
                next_client += 1;
                let client_id = ClientMessageId::from_random_bytes(next_client.to_be_bytes());
                let _ = reconciler.send(
                    room_id(room),
                    format!("m{body}"),
                    MessageKind::Text,
                    client_id,
                    u64::from(ts),
                );
            }
            ReconcilerOp::Transmit => {
                if let Some(outgoing) = reconciler.next_transmit() {
                    assert!(in_flight.is_none(), "second transmit while one is in flight");
                    in_flight = Some((outgoing.client_id, outgoing.room_id, outgoing.body));
                }
            }
            ReconcilerOp::Outcome { outcome } => {
                if let Some((client_id, _, _)) = in_flight.take() {
                    let result = match outcome {
                        Outcome::Acked { id, ts } => Ok(Some(SendAck {
                            message_id: MessageId::from(format!("s{id}")),
                            timestamp_ms: u64::from(ts),
                        })),
                        Outcome::Accepted => Ok(None),
                        Outcome::Transient => Err(TransportError::Io("reset".into())),
                        Outcome::Rejected => Err(TransportError::Rejected("no".into())),
                        Outcome::Unauthorized => Err(TransportError::Unauthorized("expired".into())),
                    };
                    if result.is_err() {
                        last_failed = Some(client_id);
                    }
                    reconciler.handle_send_outcome(client_id, result);
                }
            }
            ReconcilerOp::Echo { with_client_id, ts } => {
                if let Some((client_id, room, body)) = in_flight.clone() {
                    next_client += 1;
                    reconciler.handle_inbound(WireMessage {
                        id: MessageId::from(format!("echo{next_client}")),
                        client_id: with_client_id.then_some(client_id),
                        room_id: room,
                        sender_id: UserId::from("me"),
                        body,
                        kind: MessageKind::Text,
                        timestamp_ms: u64::from(ts),
                        read: true,
                    });
                }
            }
            ReconcilerOp::Abort => {
                in_flight = None;
                reconciler.abort_in_flight();
            }
            ReconcilerOp::RoomList { mask } => {
                reconciler.apply_room_list(rooms(mask));
            }
            ReconcilerOp::History { room, ids, has_more } => {
                let room_id = room_id(room);
                let _ = reconciler.request_older(&room_id);
                reconciler.apply_history(HistoryPage {
                    room_id,
                    messages: ids.into_iter().map(|(id, ts)| wire(room, id, ts, "them")).collect(),
                    has_more,
                });
            }
            ReconcilerOp::Retry => {
                if let Some(client_id) = last_failed {
                    let _ = reconciler.retry(client_id);
                }
            }
            ReconcilerOp::Discard => {
                if let Some(client_id) = last_failed.take() {
                    let _ = reconciler.discard(client_id);
                }
            }
            ReconcilerOp::MarkRead { room } => {
                let _ = reconciler.mark_read(&room_id(room));
            }
            ReconcilerOp::Clear => {
                in_flight = None;
                reconciler.clear();
            }
        }

        // The reconciler may drop its in-flight record when the room or message goes away
        if reconciler.in_flight().is_none() {
            in_flight = None;
        }
        registry.assert_all(&SystemSnapshot::from_reconciler(&reconciler));
    }
});
