//! Scripted session against the simulated backend.
//!
//! Connects, receives a burst of messages, sends replies while the
//! connection is dropped at intervals, then backgrounds and foregrounds the
//! app. Runs on whatever clock the caller's runtime uses; the binary pauses
//! it so backoff elapses in virtual time.

use std::{sync::Arc, time::Duration};

use chatsync_app::{
    AppLifecycle, AuthSession, ConnectionHealth, ConnectionState, DeliveryState, LifecycleSignals,
    Session, SessionConfig, SessionError, SessionHandle,
};
use chatsync_harness::{InvariantRegistry, SimDirectory, SimEnv, SimTransport, SystemSnapshot};
use chatsync_proto::{MessageKind, RoomId, UserId, WireRoom};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const STEP_TIMEOUT: Duration = Duration::from_secs(600);

const SELF_ID: &str = "me";
const PEER_ID: &str = "peer";
const ROOMS: [&str; 2] = ["general", "random"];

/// Scenario parameters.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Seed for the simulated environment.
    pub seed: u64,
    /// Session tuning.
    pub session: SessionConfig,
    /// Messages received, and replies sent.
    pub messages: usize,
    /// Drop the connection after every this many replies. Zero never drops.
    pub drop_every: usize,
}

/// Outcome of a scenario run.
#[derive(Debug, Clone)]
pub struct Report {
    /// Connection attempts the transport saw.
    pub connects: u64,
    /// Transport closes the session requested.
    pub disconnects: u64,
    /// Messages received from the peer.
    pub received: usize,
    /// Replies confirmed by the backend.
    pub delivered: usize,
    /// Replies that gave up.
    pub failed: usize,
    /// Health at the end of the run.
    pub health: ConnectionHealth,
    /// Invariant violations observed.
    pub violations: usize,
}

/// Scenario failures.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Session rejected a command.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A step did not complete in time.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

fn room(id: &str) -> WireRoom {
    WireRoom {
        id: RoomId::from(id),
        members: vec![UserId::from(SELF_ID), UserId::from(PEER_ID)],
        member_count: None,
        last_message: None,
    }
}

/// Run the scripted scenario to completion.
pub async fn run(config: ScenarioConfig) -> Result<Report, ScenarioError> {
    let env = SimEnv::with_seed(config.seed);
    let transport = Arc::new(SimTransport::new(env.clone()));
    let directory = Arc::new(SimDirectory::new());
    directory.set_rooms(ROOMS.iter().copied().map(room).collect());

    let (signals, receivers) = LifecycleSignals::channel(
        true,
        AppLifecycle::Foreground,
        Some(AuthSession::new(SELF_ID, "sim-token")),
    );
    let handle = Session::spawn(
        env,
        Arc::clone(&transport),
        Arc::clone(&directory),
        receivers,
        config.session,
    )?;
    let monitor = tokio::spawn(log_health(handle.watch_health()));

    wait_for("initial connection", || {
        handle.connection_health().is_connected() && handle.rooms().len() == ROOMS.len()
    })
    .await?;

    let general = RoomId::from(ROOMS[0]);
    let peer = UserId::from(PEER_ID);
    for n in 0..config.messages {
        transport.push_message(&general, &peer, &format!("hello {n}"));
    }

    for n in 0..config.messages {
        handle.send_message(general.clone(), format!("reply {n}"), MessageKind::Text).await?;
        if config.drop_every > 0 && (n + 1) % config.drop_every == 0 {
            debug!(after = n + 1, "dropping connection");
            transport.drop_connection();
        }
    }

    wait_for("replies to settle", || {
        own_messages(&handle, &general).all(|d| {
            matches!(d, DeliveryState::Confirmed | DeliveryState::Failed { .. })
        })
    })
    .await?;

    signals.set_lifecycle(AppLifecycle::Background);
    wait_for("background suspend", || {
        handle.connection_health().state == ConnectionState::Suspended
    })
    .await?;
    signals.set_lifecycle(AppLifecycle::Foreground);
    wait_for("foreground reconnect", || handle.connection_health().is_connected()).await?;

    let violations = check_invariants(&handle);
    let report = Report {
        connects: transport.connects_started(),
        disconnects: transport.disconnects(),
        received: handle
            .messages(&general)
            .map_or(0, |m| m.iter().filter(|m| m.sender_id == peer).count()),
        delivered: own_messages(&handle, &general)
            .filter(|d| *d == DeliveryState::Confirmed)
            .count(),
        failed: own_messages(&handle, &general)
            .filter(|d| matches!(d, DeliveryState::Failed { .. }))
            .count(),
        health: handle.connection_health(),
        violations,
    };

    handle.shutdown().await;
    monitor.abort();
    Ok(report)
}

fn own_messages(handle: &SessionHandle, room_id: &RoomId) -> impl Iterator<Item = DeliveryState> {
    handle
        .messages(room_id)
        .map(|messages| {
            messages
                .iter()
                .filter(|m| m.client_id.is_some())
                .map(|m| m.delivery.clone())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
        .into_iter()
}

fn check_invariants(handle: &SessionHandle) -> usize {
    let snapshot =
        SystemSnapshot::from_read_model(&handle.read_model(), &handle.connection_health());
    match InvariantRegistry::standard().check_all(&snapshot) {
        Ok(()) => 0,
        Err(violations) => {
            for violation in &violations {
                warn!(invariant = violation.invariant, message = %violation.message, "invariant violated");
            }
            violations.len()
        },
    }
}

async fn wait_for(what: &'static str, mut check: impl FnMut() -> bool) -> Result<(), ScenarioError> {
    let poll = async {
        while !check() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(STEP_TIMEOUT, poll).await.map_err(|_| ScenarioError::Timeout(what))
}

async fn log_health(mut health: watch::Receiver<ConnectionHealth>) {
    let mut last = health.borrow().state;
    while health.changed().await.is_ok() {
        let current = health.borrow_and_update().clone();
        if current.state != last {
            info!(
                from = ?last,
                to = ?current.state,
                attempts = current.reconnect_attempts,
                reason = ?current.suspend_reason,
                error = ?current.last_error,
                "connection state changed"
            );
            last = current.state;
        }
    }
}
