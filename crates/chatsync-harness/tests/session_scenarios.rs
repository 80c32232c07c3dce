//! End-to-end session scenarios under virtual time.
//!
//! Each test runs a real [`Session`] task against the simulated transport
//! and directory with the tokio clock paused, so reconnect backoff and
//! timeouts elapse instantly but in the right order.

use std::{sync::Arc, time::Duration};

use chatsync_app::{
    AppLifecycle, AuthSession, ConnectionState, DeliveryState, DirectoryError, LifecycleSignals,
    Session, SessionConfig, SessionError, SessionEvent, SessionHandle, SignalSenders,
};
use chatsync_core::{SuspendReason, TransportError};
use chatsync_harness::{
    InvariantRegistry, SendMode, SimDirectory, SimEnv, SimTransport, SystemSnapshot,
};
use chatsync_proto::{MessageId, MessageKind, RoomId, ServerEvent, UserId, WireMessage, WireRoom};

struct Fixture {
    env: SimEnv,
    transport: Arc<SimTransport>,
    directory: Arc<SimDirectory>,
    signals: SignalSenders,
    handle: SessionHandle,
}

fn room(id: &str) -> WireRoom {
    WireRoom {
        id: RoomId::from(id),
        members: vec![UserId::from("me"), UserId::from("them")],
        member_count: None,
        last_message: None,
    }
}

fn wire(id: &str, room: &str, ts: u64) -> WireMessage {
    WireMessage {
        id: MessageId::from(id),
        client_id: None,
        room_id: RoomId::from(room),
        sender_id: UserId::from("them"),
        body: format!("body of {id}"),
        kind: MessageKind::Text,
        timestamp_ms: ts,
        read: false,
    }
}

fn start_with(config: SessionConfig) -> Fixture {
    let env = SimEnv::with_seed(42);
    let transport = Arc::new(SimTransport::new(env.clone()));
    let directory = Arc::new(SimDirectory::new());
    directory.set_rooms(vec![room("r1"), room("r2")]);

    let (signals, receivers) = LifecycleSignals::channel(
        true,
        AppLifecycle::Foreground,
        Some(AuthSession::new("me", "t1")),
    );
    let handle = Session::spawn(
        env.clone(),
        Arc::clone(&transport),
        Arc::clone(&directory),
        receivers,
        config,
    )
    .unwrap();

    Fixture { env, transport, directory, signals, handle }
}

fn start() -> Fixture {
    start_with(SessionConfig::default())
}

/// Let the session run until `check` holds, failing after ten virtual minutes.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let wait = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(600), wait).await.is_err() {
        panic!("timed out waiting for {what}");
    }
}

async fn connected(fixture: &Fixture) {
    eventually("connected with rooms", || {
        fixture.handle.connection_health().is_connected() && fixture.handle.rooms().len() == 2
    })
    .await;
}

fn state(fixture: &Fixture) -> ConnectionState {
    fixture.handle.connection_health().state
}

fn delivery(fixture: &Fixture, room: &str) -> Vec<DeliveryState> {
    fixture
        .handle
        .messages(&RoomId::from(room))
        .map(|messages| messages.iter().map(|m| m.delivery.clone()).collect())
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn connects_and_loads_rooms() {
    let fixture = start();
    connected(&fixture).await;

    let health = fixture.handle.connection_health();
    assert_eq!(health.reconnect_attempts, 0);
    assert!(health.authenticated && health.network_online && health.app_foreground);
    assert_eq!(fixture.transport.connects_started(), 1);
    assert_eq!(fixture.directory.room_fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn out_of_order_arrivals_are_sorted() {
    let fixture = start();
    connected(&fixture).await;

    fixture.transport.push(&ServerEvent::Message(wire("m2", "r1", 2_000)));
    fixture.transport.push(&ServerEvent::Message(wire("m1", "r1", 1_000)));

    eventually("both messages", || delivery(&fixture, "r1").len() == 2).await;
    let messages = fixture.handle.messages(&RoomId::from("r1")).unwrap();
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);

    let rooms = fixture.handle.rooms();
    assert_eq!(rooms[0].id, RoomId::from("r1"));
    assert_eq!(rooms[0].unread_count, 2);
    assert_eq!(fixture.handle.connection_health().message_count, 2);
}

#[tokio::test(start_paused = true)]
async fn background_suspends_and_foreground_reconnects() {
    let fixture = start();
    connected(&fixture).await;
    let mut events = fixture.handle.subscribe();

    fixture.signals.set_lifecycle(AppLifecycle::Background);
    eventually("suspended", || state(&fixture) == ConnectionState::Suspended).await;
    assert_eq!(fixture.handle.connection_health().suspend_reason, Some(SuspendReason::Background));
    assert!(!fixture.transport.is_connected());

    fixture.signals.set_lifecycle(AppLifecycle::Foreground);
    eventually("reconnected", || fixture.handle.connection_health().is_connected()).await;

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::HealthChanged(health) = event {
            if states.last() != Some(&health.state) {
                states.push(health.state);
            }
        }
    }
    assert_eq!(
        states,
        vec![ConnectionState::Suspended, ConnectionState::Connecting, ConnectionState::Connected]
    );
    assert_eq!(fixture.transport.connects_started(), 2);
}

#[tokio::test(start_paused = true)]
async fn auth_loss_queues_sends_until_new_session() {
    let fixture = start();
    connected(&fixture).await;

    fixture.signals.set_auth(None);
    eventually("suspended", || state(&fixture) == ConnectionState::Suspended).await;
    assert_eq!(
        fixture.handle.connection_health().suspend_reason,
        Some(SuspendReason::Unauthenticated)
    );

    let first =
        fixture.handle.send_message(RoomId::from("r1"), "one", MessageKind::Text).await.unwrap();
    let second =
        fixture.handle.send_message(RoomId::from("r1"), "two", MessageKind::Text).await.unwrap();
    assert_eq!(first.delivery, DeliveryState::Pending);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(fixture.transport.sent().is_empty());

    fixture.signals.set_auth(Some(AuthSession::new("me", "t2")));
    eventually("flushed", || fixture.transport.sent().len() == 2).await;

    let sent: Vec<_> = fixture.transport.sent().iter().map(|m| m.client_id).collect();
    assert_eq!(sent, vec![first.client_id.unwrap(), second.client_id.unwrap()]);
    eventually("confirmed", || {
        delivery(&fixture, "r1") == vec![DeliveryState::Confirmed, DeliveryState::Confirmed]
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn rejected_token_waits_for_sign_in() {
    let fixture = start();
    connected(&fixture).await;
    let mut events = fixture.handle.subscribe();

    fixture.transport.revoke_token("t1");
    fixture.transport.drop_connection();
    eventually("login required", || fixture.handle.connection_health().needs_login()).await;

    let attempts = fixture.transport.connects_started();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(fixture.transport.connects_started(), attempts);

    let mut saw_auth_required = false;
    while let Ok(event) = events.try_recv() {
        saw_auth_required |= event == SessionEvent::AuthRequired;
    }
    assert!(saw_auth_required);

    fixture.signals.set_auth(Some(AuthSession::new("me", "t2")));
    eventually("reconnected", || fixture.handle.connection_health().is_connected()).await;
}

#[tokio::test(start_paused = true)]
async fn reconnects_with_backoff_after_drop() {
    let fixture = start();
    connected(&fixture).await;
    let dropped_at = fixture.env.elapsed();

    fixture.transport.script_connects([
        Err(TransportError::Io("refused".into())),
        Err(TransportError::Io("refused".into())),
    ]);
    fixture.transport.drop_connection();

    eventually("failures counted", || fixture.handle.connection_health().reconnect_attempts == 2)
        .await;
    eventually("reconnected", || fixture.handle.connection_health().is_connected()).await;

    assert_eq!(fixture.handle.connection_health().reconnect_attempts, 0);
    assert_eq!(fixture.transport.connects_started(), 4);
    assert_eq!(fixture.transport.max_connects_outstanding(), 1);
    // 500 ms, 1 s and 2 s nominal delays, each at least 80% after jitter
    assert!(fixture.env.elapsed() - dropped_at >= Duration::from_millis(2_800));
}

#[tokio::test(start_paused = true)]
async fn close_racing_the_handshake_reconnects() {
    let fixture = start();
    fixture.transport.drop_during_handshake(1);

    eventually("second channel up", || {
        fixture.transport.connects_started() == 2
            && fixture.transport.is_connected()
            && fixture.handle.connection_health().is_connected()
    })
    .await;
    assert_eq!(fixture.handle.connection_health().reconnect_attempts, 0);

    fixture
        .handle
        .send_message(RoomId::from("r1"), "after race", MessageKind::Text)
        .await
        .unwrap();
    eventually("confirmed", || delivery(&fixture, "r1") == vec![DeliveryState::Confirmed]).await;
    assert_eq!(fixture.transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn offline_sends_flush_in_order_once() {
    let fixture = start();
    connected(&fixture).await;

    fixture.signals.set_online(false);
    eventually("offline", || state(&fixture) == ConnectionState::Suspended).await;

    let mut expected = Vec::new();
    for n in 0..5 {
        let message = fixture
            .handle
            .send_message(RoomId::from("r1"), format!("queued {n}"), MessageKind::Text)
            .await
            .unwrap();
        expected.push(message.client_id.unwrap());
    }

    // One transient failure mid-flush re-queues that send at the head
    fixture.transport.fail_sends([TransportError::Io("reset".into())]);
    fixture.signals.set_online(true);

    eventually("all confirmed", || {
        let states = delivery(&fixture, "r1");
        states.len() == 5 && states.iter().all(|d| *d == DeliveryState::Confirmed)
    })
    .await;

    let sent: Vec<_> = fixture.transport.sent().iter().map(|m| m.client_id).collect();
    assert_eq!(sent, expected);
}

#[tokio::test(start_paused = true)]
async fn echo_without_ack_confirms_placeholder() {
    let fixture = start();
    connected(&fixture).await;
    fixture.transport.set_send_mode(SendMode::Echo);

    let message =
        fixture.handle.send_message(RoomId::from("r2"), "hello", MessageKind::Text).await.unwrap();
    assert!(message.id.is_local());

    eventually("confirmed", || delivery(&fixture, "r2") == vec![DeliveryState::Confirmed]).await;
    let messages = fixture.handle.messages(&RoomId::from("r2")).unwrap();
    assert!(!messages[0].id.is_local());
    assert_eq!(messages[0].client_id, message.client_id);
}

#[tokio::test(start_paused = true)]
async fn anonymous_echo_matches_by_content() {
    let fixture = start();
    connected(&fixture).await;
    fixture.transport.set_send_mode(SendMode::AnonymousEcho);

    fixture.handle.send_message(RoomId::from("r1"), "same text", MessageKind::Text).await.unwrap();

    eventually("confirmed", || delivery(&fixture, "r1") == vec![DeliveryState::Confirmed]).await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_send_fails_and_retry_delivers() {
    let fixture = start();
    connected(&fixture).await;
    let mut events = fixture.handle.subscribe();

    fixture.transport.fail_sends(vec![TransportError::Io("reset".into()); 3]);
    let message =
        fixture.handle.send_message(RoomId::from("r1"), "flaky", MessageKind::Text).await.unwrap();
    let client_id = message.client_id.unwrap();

    eventually("failed", || {
        matches!(delivery(&fixture, "r1").as_slice(), [DeliveryState::Failed { .. }])
    })
    .await;
    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        saw_failure |=
            matches!(event, SessionEvent::SendFailed { client_id: id, .. } if id == client_id);
    }
    assert!(saw_failure);
    assert!(fixture.handle.connection_health().is_connected());

    fixture.handle.retry_message(client_id).await.unwrap();
    eventually("confirmed", || delivery(&fixture, "r1") == vec![DeliveryState::Confirmed]).await;
}

#[tokio::test(start_paused = true)]
async fn discard_removes_failed_send() {
    let fixture = start();
    connected(&fixture).await;

    fixture.transport.fail_sends([TransportError::Rejected("too long".into())]);
    let message =
        fixture.handle.send_message(RoomId::from("r1"), "nope", MessageKind::Text).await.unwrap();
    eventually("failed", || {
        matches!(delivery(&fixture, "r1").as_slice(), [DeliveryState::Failed { .. }])
    })
    .await;

    fixture.handle.discard_message(message.client_id.unwrap()).await.unwrap();
    assert!(delivery(&fixture, "r1").is_empty());
    assert!(fixture.handle.rooms().iter().all(|r| r.last_message.is_none()));
}

#[tokio::test(start_paused = true)]
async fn server_close_waits_for_lifecycle_change() {
    let fixture = start();
    connected(&fixture).await;

    fixture.transport.server_disconnect("maintenance");
    eventually("suspended", || {
        fixture.handle.connection_health().suspend_reason == Some(SuspendReason::ServerClosed)
    })
    .await;

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(fixture.transport.connects_started(), 1);

    fixture.signals.set_lifecycle(AppLifecycle::Background);
    eventually("backgrounded", || {
        fixture.handle.connection_health().suspend_reason == Some(SuspendReason::Background)
    })
    .await;
    fixture.signals.set_lifecycle(AppLifecycle::Foreground);
    eventually("reconnected", || fixture.handle.connection_health().is_connected()).await;
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_retries() {
    let fixture = start();
    fixture.transport.set_connect_latency(Duration::from_secs(20));

    eventually("timed out", || fixture.handle.connection_health().reconnect_attempts >= 1).await;
    assert!(fixture.handle.connection_health().last_error.is_some());
    assert_eq!(fixture.transport.max_connects_outstanding(), 1);

    fixture.transport.set_connect_latency(Duration::ZERO);
    connected(&fixture).await;
}

#[tokio::test(start_paused = true)]
async fn load_older_pages_history() {
    let fixture = start();
    fixture.directory.set_history(
        RoomId::from("r1"),
        (1..=45).map(|n| wire(&format!("h{n:02}"), "r1", n * 1_000)).collect(),
    );
    connected(&fixture).await;

    fixture.handle.load_older(RoomId::from("r1")).await.unwrap();
    eventually("first page", || delivery(&fixture, "r1").len() == 30).await;

    fixture.handle.load_older(RoomId::from("r1")).await.unwrap();
    eventually("second page", || delivery(&fixture, "r1").len() == 45).await;

    let page = fixture.handle.messages_page(&RoomId::from("r1"), None, 10).unwrap();
    assert_eq!(page.messages.first().map(|m| m.id.as_str()), Some("h36"));
    assert!(page.has_more_local);
    assert!(!page.has_more_remote);
}

#[tokio::test(start_paused = true)]
async fn unknown_room_message_triggers_refresh() {
    let fixture = start();
    connected(&fixture).await;

    fixture.directory.add_room(room("r3"));
    fixture.transport.push(&ServerEvent::Message(wire("x1", "r3", 5_000)));

    eventually("new room", || fixture.handle.rooms().len() == 3).await;
    eventually("buffered message merged", || delivery(&fixture, "r3").len() == 1).await;
    assert_eq!(fixture.directory.room_fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_is_retried_for_held_messages() {
    let fixture = start();
    connected(&fixture).await;

    fixture.directory.fail_next([DirectoryError::Unavailable("503".into())]);
    fixture.directory.add_room(room("r3"));
    fixture.transport.push(&ServerEvent::Message(wire("x1", "r3", 5_000)));

    eventually("buffered message merged", || delivery(&fixture, "r3").len() == 1).await;
    assert_eq!(fixture.directory.room_fetches(), 3);
    assert!(fixture.handle.connection_health().is_connected());
}

#[tokio::test(start_paused = true)]
async fn mark_read_clears_unread() {
    let fixture = start();
    connected(&fixture).await;
    fixture.transport.push_message(&RoomId::from("r2"), &UserId::from("them"), "ping");
    eventually("unread", || fixture.handle.rooms().iter().any(|r| r.unread_count == 1)).await;

    fixture.handle.mark_read(RoomId::from("r2")).await.unwrap();

    assert!(fixture.handle.rooms().iter().all(|r| r.unread_count == 0));
}

#[tokio::test(start_paused = true)]
async fn logout_clears_cache_and_disconnects() {
    let fixture = start();
    connected(&fixture).await;
    fixture.signals.set_online(false);
    eventually("offline", || state(&fixture) == ConnectionState::Suspended).await;
    fixture.handle.send_message(RoomId::from("r1"), "never", MessageKind::Text).await.unwrap();

    fixture.handle.logout().await.unwrap();

    assert_eq!(state(&fixture), ConnectionState::Disconnected);
    assert!(fixture.handle.rooms().is_empty());
    assert!(fixture.handle.messages(&RoomId::from("r1")).is_none());

    fixture.signals.set_online(true);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(fixture.transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_ends_session() {
    let fixture = start();
    connected(&fixture).await;

    fixture.handle.shutdown().await;

    assert_eq!(state(&fixture), ConnectionState::Disconnected);
    assert!(!fixture.transport.is_connected());
    let result = fixture.handle.send_message(RoomId::from("r1"), "late", MessageKind::Text).await;
    assert_eq!(result.unwrap_err(), SessionError::Closed);
    // Idempotent
    fixture.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_room_send_is_refused() {
    let fixture = start();
    connected(&fixture).await;

    let result = fixture.handle.send_message(RoomId::from("nope"), "x", MessageKind::Text).await;

    assert!(matches!(result, Err(SessionError::Reconcile(_))));
}

#[tokio::test(start_paused = true)]
async fn invariants_hold_through_a_busy_session() {
    let fixture = start();
    let registry = InvariantRegistry::standard();
    connected(&fixture).await;

    for n in 0..10u64 {
        let pushed = wire(&format!("p{n}"), "r1", 10_000 - n * 100);
        fixture.transport.push(&ServerEvent::Message(pushed));
        fixture
            .handle
            .send_message(RoomId::from("r2"), format!("s{n}"), MessageKind::Text)
            .await
            .unwrap();
        if n == 4 {
            fixture.transport.drop_connection();
        }
    }
    eventually("settled", || {
        delivery(&fixture, "r2").len() == 10
            && delivery(&fixture, "r2").iter().all(|d| *d == DeliveryState::Confirmed)
    })
    .await;

    let snapshot = SystemSnapshot::from_read_model(
        &fixture.handle.read_model(),
        &fixture.handle.connection_health(),
    );
    registry.assert_all(&snapshot, "after busy session");
}

#[tokio::test(start_paused = true)]
async fn invalid_config_is_refused() {
    let mut config = SessionConfig::default();
    config.event_capacity = 0;

    let (_signals, receivers) = LifecycleSignals::channel(true, AppLifecycle::Foreground, None);
    let env = SimEnv::new();
    let result = Session::spawn(
        env.clone(),
        Arc::new(SimTransport::new(env)),
        Arc::new(SimDirectory::new()),
        receivers,
        config,
    );

    assert!(matches!(result, Err(SessionError::Config(_))));
}
