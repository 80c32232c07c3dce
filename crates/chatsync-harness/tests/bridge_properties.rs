//! Property-based tests for the bridge.
//!
//! Drives a [`Bridge`] through arbitrary interleavings of pushes, sends,
//! transport outcomes and lifecycle signals, playing the driver's role by
//! hand. Invariants are checked after every step, and server-originated
//! traffic is compared against the reference model.

use chatsync_app::{AppLifecycle, AuthSession, Bridge, DeliveryState, Effect};
use chatsync_client::ReconcilerConfig;
use chatsync_core::{ConnectionConfig, LifecycleSnapshot, TransportError};
use chatsync_harness::{InvariantRegistry, ModelCache, SimEnv, SystemSnapshot};
use chatsync_proto::{
    ClientMessageId, ClientRequest, HistoryPage, MessageId, MessageKind, RoomId, SendAck, ServerEvent, UserId,
    WireMessage, WireRoom,
};
use proptest::prelude::*;

const BASE_MS: u64 = 1_700_000_000_000;
const ROOMS: [&str; 3] = ["r0", "r1", "r2"];

fn known_rooms() -> Vec<WireRoom> {
    // r2 is never listed: traffic for it must stay out of the cache.
    ROOMS[..2]
        .iter()
        .map(|id| WireRoom {
            id: RoomId::from(*id),
            members: vec![UserId::from("me"), UserId::from("them")],
            member_count: None,
            last_message: None,
        })
        .collect()
}

fn wire(room: usize, id: u8, ts: u16, valid: bool) -> WireMessage {
    WireMessage {
        id: MessageId::from(format!("s{id}")),
        client_id: None,
        room_id: RoomId::from(ROOMS[room % ROOMS.len()]),
        sender_id: UserId::from(if valid { "them" } else { "" }),
        body: format!("push {id}"),
        kind: MessageKind::Text,
        timestamp_ms: BASE_MS + u64::from(ts),
        read: false,
    }
}

#[derive(Debug, Clone)]
enum Op {
    Push { room: usize, id: u8, ts: u16 },
    Send { room: usize },
    Opened,
    OpenFailed,
    Dropped,
    Acked,
    Echoed,
    TransientFailure,
    Rejected,
    Network(bool),
    Lifecycle(bool),
    AuthLost,
    AuthRestored,
    RoomsFetched,
    Retry,
    Tick,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..3usize, any::<u8>(), 0..500u16).prop_map(|(room, id, ts)| Op::Push { room, id, ts }),
        4 => (0..3usize).prop_map(|room| Op::Send { room }),
        3 => Just(Op::Opened),
        1 => Just(Op::OpenFailed),
        1 => Just(Op::Dropped),
        3 => Just(Op::Acked),
        2 => Just(Op::Echoed),
        2 => Just(Op::TransientFailure),
        1 => Just(Op::Rejected),
        1 => any::<bool>().prop_map(Op::Network),
        1 => any::<bool>().prop_map(Op::Lifecycle),
        1 => Just(Op::AuthLost),
        1 => Just(Op::AuthRestored),
        1 => Just(Op::RoomsFetched),
        1 => Just(Op::Retry),
        1 => Just(Op::Tick),
    ]
}

/// Plays the session's part: remembers outstanding I/O and answers it.
struct Driver {
    bridge: Bridge<SimEnv>,
    pending_open: Option<u64>,
    in_flight: Option<(ClientMessageId, RoomId, String)>,
    sent: Vec<ClientMessageId>,
    accepted: Vec<ClientMessageId>,
    next_server_id: u32,
}

impl Driver {
    fn new(max_send_attempts: u32) -> Self {
        let config = ReconcilerConfig { max_send_attempts, ..ReconcilerConfig::default() };
        let signals =
            LifecycleSnapshot { network_online: true, app: AppLifecycle::Foreground, user_id: None };
        let bridge = Bridge::new(
            SimEnv::with_seed(7),
            ConnectionConfig::default(),
            config,
            signals,
            Some(AuthSession::new("me", "t1")),
        )
        .unwrap();

        let mut driver = Self {
            bridge,
            pending_open: None,
            in_flight: None,
            sent: Vec::new(),
            accepted: Vec::new(),
            next_server_id: 0,
        };
        let effects = driver.bridge.start();
        driver.absorb(effects).unwrap();
        let effects = driver.bridge.rooms_fetched(Ok(known_rooms()));
        driver.absorb(effects).unwrap();
        driver
    }

    fn absorb(&mut self, effects: Vec<Effect>) -> Result<(), TestCaseError> {
        for effect in effects {
            match effect {
                Effect::OpenTransport { generation, .. } => {
                    prop_assert!(
                        self.pending_open.is_none(),
                        "second open while generation {:?} is outstanding",
                        self.pending_open
                    );
                    self.pending_open = Some(generation);
                },
                Effect::CloseTransport { .. } => {
                    self.pending_open = None;
                    self.in_flight = None;
                },
                Effect::Transmit { client_id, room_id, payload } => {
                    prop_assert!(
                        self.in_flight.is_none(),
                        "transmit of {client_id} while another send is in flight"
                    );
                    let body = match ClientRequest::decode(&payload) {
                        Ok(ClientRequest::SendMessage(outgoing)) => outgoing.body,
                        Err(error) => return Err(TestCaseError::fail(format!("bad payload: {error}"))),
                    };
                    self.in_flight = Some((client_id, room_id, body));
                },
                Effect::RefreshRooms
                | Effect::FetchHistory { .. } | Effect::Health(_) | Effect::Publish(_) => {},
            }
        }
        Ok(())
    }

    fn server_id(&mut self) -> MessageId {
        self.next_server_id += 1;
        MessageId::from(format!("srv-{}", self.next_server_id))
    }

    fn step(&mut self, op: Op) -> Result<(), TestCaseError> {
        let effects = match op {
            Op::Push { room, id, ts } => {
                let payload = ServerEvent::Message(wire(room, id, ts, true)).encode().unwrap();
                self.bridge.payload_received(&payload)
            },
            Op::Send { room } => {
                let room_id = RoomId::from(ROOMS[room]);
                let body = format!("send {}", self.sent.len());
                match self.bridge.send_message(room_id, body, MessageKind::Text) {
                    Ok((message, effects)) => {
                        if let Some(client_id) = message.client_id {
                            self.sent.push(client_id);
                        }
                        effects
                    },
                    Err(_) => Vec::new(),
                }
            },
            Op::Opened => match self.pending_open.take() {
                Some(generation) => self.bridge.transport_opened(generation),
                None => Vec::new(),
            },
            Op::OpenFailed => match self.pending_open.take() {
                Some(generation) => {
                    self.bridge.transport_failed(generation, TransportError::Io("refused".into()))
                },
                None => Vec::new(),
            },
            Op::Dropped => {
                if self.pending_open.is_none() {
                    self.bridge.transport_closed(TransportError::Io("reset".into()))
                } else {
                    Vec::new()
                }
            },
            Op::Acked => match self.in_flight.take() {
                Some((client_id, _, _)) => {
                    self.accepted.push(client_id);
                    let ack = SendAck { message_id: self.server_id(), timestamp_ms: BASE_MS + 1_000 };
                    self.bridge.send_completed(client_id, Ok(Some(ack)))
                },
                None => Vec::new(),
            },
            Op::Echoed => match self.in_flight.take() {
                Some((client_id, room_id, body)) => {
                    self.accepted.push(client_id);
                    let echo = WireMessage {
                        id: self.server_id(),
                        client_id: Some(client_id),
                        room_id,
                        sender_id: UserId::from("me"),
                        body,
                        kind: MessageKind::Text,
                        timestamp_ms: BASE_MS + 1_000,
                        read: true,
                    };
                    let payload = ServerEvent::Message(echo).encode().unwrap();
                    let effects = self.bridge.payload_received(&payload);
                    self.absorb(effects)?;
                    self.bridge.send_completed(client_id, Ok(None))
                },
                None => Vec::new(),
            },
            Op::TransientFailure => match self.in_flight.take() {
                Some((client_id, _, _)) => {
                    self.bridge.send_completed(client_id, Err(TransportError::Io("reset".into())))
                },
                None => Vec::new(),
            },
            Op::Rejected => match self.in_flight.take() {
                Some((client_id, _, _)) => {
                    self.bridge.send_completed(client_id, Err(TransportError::Rejected("spam".into())))
                },
                None => Vec::new(),
            },
            Op::Network(online) => self.bridge.network_changed(online),
            Op::Lifecycle(foreground) => self.bridge.lifecycle_changed(if foreground {
                AppLifecycle::Foreground
            } else {
                AppLifecycle::Background
            }),
            Op::AuthLost => self.bridge.auth_changed(None),
            Op::AuthRestored => {
                let token = format!("t{}", self.next_server_id);
                self.bridge.auth_changed(Some(AuthSession::new("me", token)))
            },
            Op::RoomsFetched => self.bridge.rooms_fetched(Ok(known_rooms())),
            Op::Retry => {
                match self.failed_message() {
                    Some(client_id) => self.bridge.retry_message(client_id).unwrap_or_default(),
                    None => Vec::new(),
                }
            },
            Op::Tick => self.bridge.tick(),
        };
        self.absorb(effects)
    }

    fn failed_message(&self) -> Option<ClientMessageId> {
        let reconciler = self.bridge.reconciler();
        reconciler
            .rooms()
            .filter_map(|room| reconciler.messages(&room.id))
            .flatten()
            .find(|m| matches!(m.delivery, DeliveryState::Failed { .. }))
            .and_then(|m| m.client_id)
    }

    fn check(&self, registry: &InvariantRegistry) -> Result<(), TestCaseError> {
        let snapshot = SystemSnapshot::capture(
            self.bridge.reconciler(),
            self.bridge.read_model(),
            &self.bridge.health(),
        );
        if let Err(violations) = registry.check_all(&snapshot) {
            return Err(TestCaseError::fail(format!("{violations:?}")));
        }
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn invariants_hold_after_every_step(ops in prop::collection::vec(op(), 1..80)) {
        let registry = InvariantRegistry::standard();
        let mut driver = Driver::new(3);
        driver.check(&registry)?;

        for op in ops {
            driver.step(op)?;
            driver.check(&registry)?;
        }
    }

    #[test]
    fn each_send_is_accepted_at_most_once(ops in prop::collection::vec(op(), 1..80)) {
        let mut driver = Driver::new(3);
        for op in ops {
            driver.step(op)?;
        }

        let mut accepted = driver.accepted.clone();
        accepted.sort_unstable();
        accepted.dedup();
        prop_assert_eq!(accepted.len(), driver.accepted.len());
    }

    #[test]
    fn transient_faults_preserve_send_order(
        ops in prop::collection::vec(op(), 1..80)
            .prop_map(|ops| ops.into_iter().filter(|op| !matches!(op, Op::Rejected | Op::Retry)).collect::<Vec<_>>())
    ) {
        let mut driver = Driver::new(1_000);
        for op in ops {
            driver.step(op)?;
        }

        let accepted = &driver.accepted;
        prop_assert!(accepted.len() <= driver.sent.len());
        prop_assert_eq!(accepted.as_slice(), &driver.sent[..accepted.len()]);
    }

    #[test]
    fn server_traffic_matches_model(
        pushes in prop::collection::vec((0..3usize, any::<u8>(), 0..200u16, prop::bool::weighted(0.9)), 1..120),
        page in prop::collection::vec((any::<u8>(), 0..200u16), 0..30),
    ) {
        let mut driver = Driver::new(3);
        let mut model = ModelCache::with_rooms(known_rooms().into_iter().map(|room| room.id));

        for (room, id, ts, valid) in pushes {
            let message = wire(room, id, ts, valid);
            model.apply(&message);
            // Invalid messages fail to decode and never reach the cache.
            let payload = ServerEvent::Message(message).encode().unwrap();
            let effects = driver.bridge.payload_received(&payload);
            driver.absorb(effects)?;
        }

        let room_id = RoomId::from(ROOMS[0]);
        let effects = driver.bridge.load_older(&room_id).unwrap();
        driver.absorb(effects)?;
        let messages: Vec<WireMessage> = page.into_iter().map(|(id, ts)| wire(0, id, ts, true)).collect();
        for message in &messages {
            model.apply(message);
        }
        let effects = driver.bridge.history_fetched(
            &room_id,
            Ok(HistoryPage { room_id: room_id.clone(), messages, has_more: false }),
        );
        driver.absorb(effects)?;

        for room in known_rooms() {
            let cached: Vec<MessageId> = driver
                .bridge
                .read_model()
                .messages(&room.id)
                .unwrap_or_default()
                .iter()
                .map(|m| m.id.clone())
                .collect();
            prop_assert_eq!(cached, model.ids(&room.id));
        }
        prop_assert!(driver.bridge.read_model().messages(&RoomId::from(ROOMS[2])).is_none());
    }
}
