//! Connection lifecycle state machine.
//!
//! Single source of truth for whether the messaging channel should be up.
//! Uses the action pattern: methods take an [`Environment`] for time and
//! randomness and return actions for the driver to execute. The manager never
//! touches the transport itself, which keeps it pure and deterministic.
//!
//! # State Machine
//!
//! ```text
//!                  preconditions hold
//! ┌──────────────┐ ───────────────────> ┌────────────┐  opened   ┌───────────┐
//! │ Disconnected │                      │ Connecting │──────────>│ Connected │
//! └──────────────┘ <─── logout ──────── └────────────┘           └───────────┘
//!        ^              teardown           │  ^    │                  │
//!        │                        failure/ │  │    │ precondition     │ dropped
//!        │                        timeout  v  │    │ lost             v
//!        │                       ┌──────────────┐  │           ┌──────────────┐
//!        └───────────────────────│ Reconnecting │  └──────────>│  Suspended   │
//!                                └──────────────┘ backoff      └──────────────┘
//!                                                 elapsed
//! ```
//!
//! Any state except Disconnected moves to Suspended when a precondition
//! (network, foreground, authenticated session) is lost, and back to
//! Connecting once all hold again.
//!
//! # Invariants
//!
//! - At most one transport open is outstanding: [`ConnectionAction::Open`] is
//!   only emitted when entering Connecting, never from Connecting.
//! - Every open carries a fresh generation; outcomes for older generations
//!   are ignored.
//! - `reconnect_attempts` increments on each failed Connecting attempt and
//!   resets only on reaching Connected.

use std::{
    ops::{Add, Sub},
    time::Duration,
};

use chatsync_proto::UserId;
use tracing::{debug, info, warn};

use crate::{
    backoff::Backoff,
    env::Environment,
    error::{ConfigError, TransportError},
    health::{ConnectionHealth, ConnectionState, SuspendReason},
    signals::{AppLifecycle, LifecycleSnapshot},
};

/// Delay before the first reconnect attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound on reconnect delays.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Fractional jitter applied to every delay (±20%).
pub const DEFAULT_JITTER: f64 = 0.2;

/// Time allowed for the transport handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time in the background before the connection is suspended.
pub const DEFAULT_BACKGROUND_GRACE: Duration = Duration::ZERO;

/// Connection manager configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Base reconnect delay.
    pub base_delay: Duration,
    /// Maximum reconnect delay.
    pub max_delay: Duration,
    /// Jitter fraction in `[0, 1)`.
    pub jitter: f64,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Background time tolerated before suspending. Zero suspends at once.
    pub background_grace: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            background_grace: DEFAULT_BACKGROUND_GRACE,
        }
    }
}

impl ConnectionConfig {
    /// Check every value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Backoff::new(self.base_delay, self.max_delay, self.jitter)?;
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Zero("connect_timeout"));
        }
        Ok(())
    }
}

/// Inputs to the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Network reachability changed.
    NetworkChanged(bool),

    /// App moved to the foreground or background.
    LifecycleChanged(AppLifecycle),

    /// Auth provider published a new session, or signed out (`None`).
    ///
    /// Token refresh failures arrive here as `None`.
    AuthChanged(Option<UserId>),

    /// Transport handshake for `generation` succeeded.
    TransportOpened {
        /// Generation from the matching [`ConnectionAction::Open`]
        generation: u64,
    },

    /// Transport handshake for `generation` failed.
    TransportFailed {
        /// Generation from the matching [`ConnectionAction::Open`]
        generation: u64,
        /// Failure
        error: TransportError,
    },

    /// The channel went down, during or after the handshake.
    TransportClosed {
        /// Cause of the close
        error: TransportError,
    },

    /// Time passed; fires deadlines (handshake timeout, backoff, background
    /// grace).
    Tick,

    /// Explicit logout.
    Logout,

    /// App teardown. No further connections are made.
    Shutdown,
}

/// Actions returned by the connection manager.
///
/// The driver executes these:
/// - `Open`: start a transport handshake, report the outcome with the same
///   generation
/// - `Close`: close the transport, aborting any outstanding handshake
/// - `FlushOutbox`: start transmitting queued messages
/// - `ClearOutbox`: discard queued messages (logout)
/// - `AuthRequired`: tell the UI the user has to sign in again
/// - `HealthChanged`: publish the new health snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open the transport.
    Open {
        /// Attempt generation
        generation: u64,
    },

    /// Close the transport.
    Close {
        /// Reason for closing the connection
        reason: String,
    },

    /// Channel is up; transmit queued messages in order.
    FlushOutbox,

    /// Drop queued messages.
    ClearOutbox,

    /// Credentials were rejected.
    AuthRequired,

    /// Health snapshot changed.
    HealthChanged(ConnectionHealth),
}

/// Connection lifecycle state machine.
///
/// Pure state machine: no I/O. Time and randomness come from the
/// [`Environment`] passed to [`ConnectionManager::handle`].
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct ConnectionManager<I> {
    state: ConnectionState,
    config: ConnectionConfig,
    backoff: Backoff,

    network_online: bool,
    foreground: bool,
    /// Start of the background grace window, if one is running
    background_since: Option<I>,
    user_id: Option<UserId>,
    /// Backend rejected the current credentials
    auth_rejected: bool,
    /// Backend closed the channel on purpose
    server_closed: bool,
    shut_down: bool,

    attempts: u32,
    last_error: Option<String>,
    message_count: u64,
    dropped_sends: u64,
    suspend_reason: Option<SuspendReason>,

    generation: u64,
    connect_started: Option<I>,
    connect_deadline: Option<I>,
    retry_at: Option<I>,
    retry_delay: Option<Duration>,
}

impl<I> ConnectionManager<I>
where
    I: Copy + Ord + std::fmt::Debug + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    /// Create a manager in [`ConnectionState::Disconnected`].
    ///
    /// Call [`ConnectionManager::start`] to connect if the initial signals
    /// already allow it.
    ///
    /// # Errors
    ///
    /// - `ConfigError` if the configuration is invalid
    pub fn new(config: ConnectionConfig, signals: LifecycleSnapshot) -> Result<Self, ConfigError> {
        config.validate()?;
        let backoff = Backoff::new(config.base_delay, config.max_delay, config.jitter)?;

        Ok(Self {
            state: ConnectionState::Disconnected,
            config,
            backoff,
            network_online: signals.network_online,
            foreground: signals.app.is_foreground(),
            background_since: None,
            user_id: signals.user_id,
            auth_rejected: false,
            server_closed: false,
            shut_down: false,
            attempts: 0,
            last_error: None,
            message_count: 0,
            dropped_sends: 0,
            suspend_reason: None,
            generation: 0,
            connect_started: None,
            connect_deadline: None,
            retry_at: None,
            retry_delay: None,
        })
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Generation of the most recent open.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Signed-in user, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    /// Snapshot for UI and diagnostics.
    #[must_use]
    pub fn health(&self) -> ConnectionHealth {
        ConnectionHealth {
            state: self.state,
            reconnect_attempts: self.attempts,
            last_error: self.last_error.clone(),
            network_online: self.network_online,
            app_foreground: self.foreground,
            authenticated: self.user_id.is_some() && !self.auth_rejected,
            message_count: self.message_count,
            dropped_sends: self.dropped_sends,
            suspend_reason: self.suspend_reason,
            next_retry_delay: self.retry_delay,
        }
    }

    /// Earliest instant at which [`ConnectionEvent::Tick`] has work to do.
    /// `None` if nothing is scheduled.
    #[must_use]
    pub fn next_wakeup(&self) -> Option<I> {
        let deadline = match self.state {
            ConnectionState::Connecting => self.connect_deadline,
            ConnectionState::Reconnecting => self.retry_at,
            _ => None,
        };
        let grace = self.background_since.map(|since| since + self.config.background_grace);

        match (deadline, grace) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Evaluate the initial signals and connect if they allow it.
    pub fn start<E: Environment<Instant = I>>(&mut self, env: &E) -> Vec<ConnectionAction> {
        let before = self.health();
        let mut actions = Vec::new();
        self.evaluate(env.now(), &mut actions);
        self.finish(before, actions)
    }

    /// Count an inbound message.
    pub fn record_message_received(&mut self) -> Vec<ConnectionAction> {
        self.message_count += 1;
        vec![ConnectionAction::HealthChanged(self.health())]
    }

    /// Count outgoing messages evicted from a full send queue.
    pub fn record_dropped_sends(&mut self, count: u64) -> Vec<ConnectionAction> {
        if count == 0 {
            return Vec::new();
        }
        self.dropped_sends += count;
        warn!(dropped = count, total = self.dropped_sends, "send queue overflow");
        vec![ConnectionAction::HealthChanged(self.health())]
    }

    /// Process an event and return actions.
    pub fn handle<E: Environment<Instant = I>>(
        &mut self,
        env: &E,
        event: ConnectionEvent,
    ) -> Vec<ConnectionAction> {
        let before = self.health();
        let mut actions = Vec::new();
        let now = env.now();

        match event {
            ConnectionEvent::NetworkChanged(online) => {
                if self.network_online != online {
                    self.network_online = online;
                    self.server_closed = false;
                }
                self.evaluate(now, &mut actions);
            },
            ConnectionEvent::LifecycleChanged(app) => {
                self.handle_lifecycle(app, now);
                self.evaluate(now, &mut actions);
            },
            ConnectionEvent::AuthChanged(user_id) => {
                if user_id.is_some() {
                    // A new session is a new token
                    self.auth_rejected = false;
                    self.server_closed = false;
                }
                let switched = matches!(
                    (&self.user_id, &user_id),
                    (Some(current), Some(next)) if current != next
                );
                self.user_id = user_id;

                // Channel belongs to the previous user
                if switched && self.state != ConnectionState::Suspended {
                    self.enter_disconnected("user changed", &mut actions);
                }
                self.evaluate(now, &mut actions);
            },
            ConnectionEvent::TransportOpened { generation } => {
                self.handle_opened(generation, &mut actions);
            },
            ConnectionEvent::TransportFailed { generation, error } => {
                if generation == self.generation && self.state == ConnectionState::Connecting {
                    self.handle_failure(env, now, error, true, &mut actions);
                } else {
                    debug!(generation, current = self.generation, state = ?self.state, %error, "ignoring stale connect failure");
                }
            },
            ConnectionEvent::TransportClosed { error } => {
                match self.state {
                    ConnectionState::Connected => {
                        self.handle_failure(env, now, error, false, &mut actions);
                    },
                    // Channel died before the handshake finished: fail this generation
                    ConnectionState::Connecting => {
                        actions.push(ConnectionAction::Close {
                            reason: "closed during handshake".to_string(),
                        });
                        self.handle_failure(env, now, error, true, &mut actions);
                    },
                    _ => {
                        debug!(state = ?self.state, %error, "ignoring close of inactive transport");
                    },
                }
            },
            ConnectionEvent::Tick => self.handle_tick(env, now, &mut actions),
            ConnectionEvent::Logout => {
                self.user_id = None;
                self.auth_rejected = false;
                self.server_closed = false;
                self.enter_disconnected("logout", &mut actions);
                actions.push(ConnectionAction::ClearOutbox);
            },
            ConnectionEvent::Shutdown => {
                self.shut_down = true;
                self.enter_disconnected("shutdown", &mut actions);
            },
        }

        self.finish(before, actions)
    }

    fn finish(
        &self,
        before: ConnectionHealth,
        mut actions: Vec<ConnectionAction>,
    ) -> Vec<ConnectionAction> {
        let after = self.health();
        if after != before {
            actions.push(ConnectionAction::HealthChanged(after));
        }
        actions
    }

    fn handle_lifecycle(&mut self, app: AppLifecycle, now: I) {
        match app {
            AppLifecycle::Foreground => {
                self.background_since = None;
                if !self.foreground {
                    self.foreground = true;
                    self.server_closed = false;
                }
            },
            AppLifecycle::Background => {
                if !self.foreground || self.background_since.is_some() {
                    return;
                }
                if self.config.background_grace.is_zero() {
                    self.foreground = false;
                } else {
                    self.background_since = Some(now);
                }
            },
        }
    }

    /// First missing precondition, if any.
    fn blocking_reason(&self) -> Option<SuspendReason> {
        if self.user_id.is_none() {
            Some(SuspendReason::Unauthenticated)
        } else if self.auth_rejected {
            Some(SuspendReason::AuthRejected)
        } else if !self.network_online {
            Some(SuspendReason::Offline)
        } else if !self.foreground {
            Some(SuspendReason::Background)
        } else if self.server_closed {
            Some(SuspendReason::ServerClosed)
        } else {
            None
        }
    }

    /// Reconcile the state with the current preconditions.
    fn evaluate(&mut self, now: I, actions: &mut Vec<ConnectionAction>) {
        if self.shut_down {
            return;
        }

        match (self.blocking_reason(), self.state) {
            (Some(_), ConnectionState::Disconnected) | (None, ConnectionState::Connecting) => {},
            (Some(reason), ConnectionState::Suspended) => self.suspend_reason = Some(reason),
            (Some(reason), _) => self.enter_suspended(reason, true, actions),
            (None, ConnectionState::Disconnected | ConnectionState::Suspended) => {
                self.start_connecting(now, actions);
            },
            (None, ConnectionState::Connected | ConnectionState::Reconnecting) => {},
        }
    }

    fn handle_opened(&mut self, generation: u64, actions: &mut Vec<ConnectionAction>) {
        if generation == self.generation && self.state == ConnectionState::Connecting {
            self.set_state(ConnectionState::Connected);
            self.attempts = 0;
            self.backoff.reset();
            self.last_error = None;
            self.clear_timers();
            actions.push(ConnectionAction::FlushOutbox);
            return;
        }

        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(generation, current = self.generation, "ignoring stale open");
            },
            _ => {
                // Handshake finished after we stopped wanting it
                debug!(generation, state = ?self.state, "closing unwanted connection");
                actions.push(ConnectionAction::Close {
                    reason: "stale connection attempt".to_string(),
                });
            },
        }
    }

    fn handle_failure<E: Environment<Instant = I>>(
        &mut self,
        env: &E,
        now: I,
        error: TransportError,
        from_connecting: bool,
        actions: &mut Vec<ConnectionAction>,
    ) {
        self.last_error = Some(error.to_string());

        if error.is_auth() {
            warn!(%error, "credentials rejected");
            self.auth_rejected = true;
            self.enter_suspended(SuspendReason::AuthRejected, false, actions);
            actions.push(ConnectionAction::AuthRequired);
            return;
        }

        if !error.is_transient() {
            warn!(%error, "connection refused by server");
            self.server_closed = true;
            self.enter_suspended(SuspendReason::ServerClosed, false, actions);
            return;
        }

        if from_connecting {
            self.attempts = self.attempts.saturating_add(1);
        }
        let delay = self.backoff.next_delay(self.attempts, env.random_u64());

        self.set_state(ConnectionState::Reconnecting);
        self.connect_started = None;
        self.connect_deadline = None;
        self.retry_at = Some(now + delay);
        self.retry_delay = Some(delay);

        info!(attempts = self.attempts, ?delay, %error, "scheduling reconnect");
    }

    fn handle_tick<E: Environment<Instant = I>>(
        &mut self,
        env: &E,
        now: I,
        actions: &mut Vec<ConnectionAction>,
    ) {
        if let Some(since) = self.background_since {
            if now - since >= self.config.background_grace {
                self.background_since = None;
                self.foreground = false;
                self.evaluate(now, actions);
            }
        }

        match self.state {
            ConnectionState::Connecting => {
                let Some(deadline) = self.connect_deadline else { return };
                if now < deadline {
                    return;
                }
                let elapsed = self.connect_started.map_or(self.config.connect_timeout, |s| now - s);
                actions.push(ConnectionAction::Close { reason: "connect timeout".to_string() });
                self.handle_failure(env, now, TransportError::Timeout { elapsed }, true, actions);
            },
            ConnectionState::Reconnecting => {
                let Some(retry_at) = self.retry_at else { return };
                if now < retry_at {
                    return;
                }
                match self.blocking_reason() {
                    None => self.start_connecting(now, actions),
                    Some(reason) => self.enter_suspended(reason, false, actions),
                }
            },
            ConnectionState::Disconnected
            | ConnectionState::Connected
            | ConnectionState::Suspended => {},
        }
    }

    fn start_connecting(&mut self, now: I, actions: &mut Vec<ConnectionAction>) {
        debug_assert_ne!(self.state, ConnectionState::Connecting);

        self.generation += 1;
        self.suspend_reason = None;
        self.set_state(ConnectionState::Connecting);
        self.retry_at = None;
        self.retry_delay = None;
        self.connect_started = Some(now);
        self.connect_deadline = Some(now + self.config.connect_timeout);

        actions.push(ConnectionAction::Open { generation: self.generation });
    }

    fn enter_suspended(
        &mut self,
        reason: SuspendReason,
        close_transport: bool,
        actions: &mut Vec<ConnectionAction>,
    ) {
        if close_transport
            && matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected)
        {
            actions.push(ConnectionAction::Close { reason: format!("suspended: {reason:?}") });
        }

        self.suspend_reason = Some(reason);
        self.set_state(ConnectionState::Suspended);
        self.clear_timers();
    }

    fn enter_disconnected(&mut self, reason: &str, actions: &mut Vec<ConnectionAction>) {
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            actions.push(ConnectionAction::Close { reason: reason.to_string() });
        }

        self.suspend_reason = None;
        self.background_since = None;
        self.set_state(ConnectionState::Disconnected);
        self.clear_timers();
    }

    fn clear_timers(&mut self) {
        self.connect_started = None;
        self.connect_deadline = None;
        self.retry_at = None;
        self.retry_delay = None;
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            info!(from = ?self.state, to = ?state, generation = self.generation, "connection state changed");
            self.state = state;
        }
    }
}
