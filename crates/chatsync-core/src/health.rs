//! Observable connection health.

use std::time::Duration;

/// Connection state.
///
/// Exactly one value is active at a time, and only
/// [`crate::ConnectionManager`] transitions it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection wanted: never started, logged out, or torn down.
    Disconnected,
    /// Transport handshake outstanding.
    Connecting,
    /// Channel is up.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// A precondition is missing; see [`SuspendReason`].
    Suspended,
}

/// Why the manager is holding the connection down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuspendReason {
    /// No signed-in user.
    Unauthenticated,
    /// Backend rejected the credentials; waits for a new session.
    AuthRejected,
    /// Network unreachable.
    Offline,
    /// App is in the background.
    Background,
    /// Backend closed the channel on purpose; waits for a lifecycle change.
    ServerClosed,
}

/// Snapshot of the connection for UI indicators and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHealth {
    /// Current state.
    pub state: ConnectionState,
    /// Consecutive failed connect attempts. Resets to 0 on Connected.
    pub reconnect_attempts: u32,
    /// Most recent error. Cleared on Connected.
    pub last_error: Option<String>,
    /// Last-known network reachability.
    pub network_online: bool,
    /// Last-known app foreground flag (after the background grace window).
    pub app_foreground: bool,
    /// Last-known authenticated flag.
    pub authenticated: bool,
    /// Messages received since the manager was created. Diagnostic only.
    pub message_count: u64,
    /// Outgoing messages evicted from a full send queue.
    pub dropped_sends: u64,
    /// Set while [`ConnectionState::Suspended`].
    pub suspend_reason: Option<SuspendReason>,
    /// Backoff delay currently being waited out.
    pub next_retry_delay: Option<Duration>,
}

impl ConnectionHealth {
    /// True if the channel is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// True if the UI should ask the user to sign in again.
    #[must_use]
    pub fn needs_login(&self) -> bool {
        matches!(
            self.suspend_reason,
            Some(SuspendReason::AuthRejected | SuspendReason::Unauthenticated)
        )
    }
}
