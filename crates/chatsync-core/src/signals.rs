//! Lifecycle signal values consumed by the connection manager.
//!
//! The providers themselves (reachability, app lifecycle, auth/session) live
//! outside the core; only the values they publish are modelled here.

use std::fmt;

use chatsync_proto::UserId;

/// Foreground/background state of the host app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AppLifecycle {
    /// Visible and interactive.
    #[default]
    Foreground,
    /// Backgrounded; sockets should not be kept idle.
    Background,
}

impl AppLifecycle {
    /// True in the foreground.
    #[must_use]
    pub fn is_foreground(self) -> bool {
        self == Self::Foreground
    }
}

/// An authenticated session as supplied by the auth provider.
///
/// Each new value is a new token: a session rejected by the backend is only
/// retried once the provider publishes a different one.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSession {
    /// Signed-in user.
    pub user_id: UserId,
    /// Bearer token presented to the transport.
    pub token: String,
}

impl AuthSession {
    /// Create a session.
    pub fn new(user_id: impl Into<UserId>, token: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), token: token.into() }
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Values of all three lifecycle signals at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSnapshot {
    /// Network reachability.
    pub network_online: bool,
    /// App lifecycle.
    pub app: AppLifecycle,
    /// Signed-in user, if any.
    pub user_id: Option<UserId>,
}

impl Default for LifecycleSnapshot {
    fn default() -> Self {
        Self { network_online: false, app: AppLifecycle::Foreground, user_id: None }
    }
}
