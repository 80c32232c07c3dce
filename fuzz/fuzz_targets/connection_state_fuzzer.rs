//! Fuzz target for the connection lifecycle state machine
//!
//! Ensure signal handling, generations and backoff stay consistent under
//! arbitrary event orderings (HIGH priority)
//!
//! # Strategy
//!
//! - Signals: network, lifecycle and auth flapping in any order
//! - Transport outcomes: current, stale and future generations
//! - Time: ticks after arbitrary virtual delays (grace, backoff, timeout)
//!
//! # Invariants
//!
//! - Connected implies zero attempts and no error
//! - Suspend reason present exactly while Suspended
//! - Open generations strictly increase
//! - Never Connecting/Connected while offline or signed out

#![no_main]

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use arbitrary::Arbitrary;
use chatsync_core::{
    AppLifecycle, ConnectionAction, ConnectionConfig, ConnectionEvent, ConnectionManager,
    ConnectionState, Environment, LifecycleSnapshot, TransportError,
};
use chatsync_harness::{InvariantRegistry, SystemSnapshot};
use chatsync_proto::UserId;
use libfuzzer_sys::fuzz_target;

#[derive(Clone)]
struct FuzzEnv {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl FuzzEnv {
    fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Environment for FuzzEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    fn wall_clock_millis(&self) -> u64 {
        self.offset.lock().unwrap().as_millis() as u64
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0x5A);
    }
}

#[derive(Debug, Clone, Arbitrary)]
enum Event {
    Network(bool),
    Lifecycle(bool),
    Auth(Option<u8>),
    Opened { skew: i8 },
    Failed { skew: i8, error: Failure },
    Closed { error: Failure },
    Wait { millis: u16 },
    Tick,
    Logout,
    Shutdown,
}

#[derive(Debug, Clone, Arbitrary)]
enum Failure {
    Timeout,
    Io,
    Unauthorized,
    ServerClosed,
}

impl Failure {
    fn error(&self) -> TransportError {
        match self {
            Self::Timeout => TransportError::Timeout { elapsed: Duration::from_secs(10) },
            Self::Io => TransportError::Io("reset".into()),
            Self::Unauthorized => TransportError::Unauthorized("expired".into()),
            Self::ServerClosed => TransportError::ServerClosed("maintenance".into()),
        }
    }
}

fuzz_target!(|events: Vec<Event>| {
    let env = FuzzEnv { base: Instant::now(), offset: Arc::new(Mutex::new(Duration::ZERO)) };
    let signals = LifecycleSnapshot {
        network_online: true,
        app: AppLifecycle::Foreground,
        user_id: Some(UserId::from("u0")),
    };
    let Ok(mut manager) = ConnectionManager::new(ConnectionConfig::default(), signals) else {
        return;
    };

    let registry = InvariantRegistry::standard();
    let mut last_open = 0u64;
    let mut actions = manager.start(&env);

    for event in events {
        for action in &actions {
            if let ConnectionAction::Open { generation } = action {
                assert!(*generation > last_open, "generation {generation} after {last_open}");
                last_open = *generation;
            }
        }

        let event = match event {
            Event::Network(online) => ConnectionEvent::NetworkChanged(online),
            Event::Lifecycle(foreground) => ConnectionEvent::LifecycleChanged(if foreground {
                AppLifecycle::Foreground
            } else {
                AppLifecycle::Background
            }),
            Event::Auth(user) => {
                ConnectionEvent::AuthChanged(user.map(|n| UserId::from(format!("u{}", n % 3))))
            }
            Event::Opened { skew } => ConnectionEvent::TransportOpened {
                generation: manager.generation().saturating_add_signed(i64::from(skew % 2)),
            },
            Event::Failed { skew, error } => ConnectionEvent::TransportFailed {
                generation: manager.generation().saturating_add_signed(i64::from(skew % 2)),
                error: error.error(),
            },
            Event::Closed { error } => ConnectionEvent::TransportClosed { error: error.error() },
            Event::Wait { millis } => {
                env.advance(Duration::from_millis(u64::from(millis) * 10));
                ConnectionEvent::Tick
            }
            Event::Tick => ConnectionEvent::Tick,
            Event::Logout => ConnectionEvent::Logout,
            Event::Shutdown => ConnectionEvent::Shutdown,
        };
        actions = manager.handle(&env, event);

        let health = manager.health();
        registry.assert_all(&SystemSnapshot::from_health(&health));
        if matches!(manager.state(), ConnectionState::Connecting | ConnectionState::Connected) {
            assert!(health.network_online && health.authenticated);
        }
    }
});
