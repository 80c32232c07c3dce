//! Lifecycle signal observables.
//!
//! Each provider (reachability, app lifecycle, auth) is modelled as a
//! `watch` channel: the current value is always readable and every update
//! wakes the session.

use chatsync_core::{AppLifecycle, AuthSession, LifecycleSnapshot};
use tokio::sync::watch;

/// Receiving side of the three signals, consumed by the session.
#[derive(Debug, Clone)]
pub struct LifecycleSignals {
    /// Network reachability.
    pub network: watch::Receiver<bool>,
    /// App foreground/background.
    pub lifecycle: watch::Receiver<AppLifecycle>,
    /// Current auth session. Token refresh failure publishes `None`.
    pub auth: watch::Receiver<Option<AuthSession>>,
}

/// Publishing side of the three signals, held by the providers.
#[derive(Debug, Clone)]
pub struct SignalSenders {
    /// Network reachability.
    pub network: watch::Sender<bool>,
    /// App foreground/background.
    pub lifecycle: watch::Sender<AppLifecycle>,
    /// Current auth session.
    pub auth: watch::Sender<Option<AuthSession>>,
}

impl LifecycleSignals {
    /// Create connected sender/receiver pairs with initial values.
    pub fn channel(
        network_online: bool,
        app: AppLifecycle,
        auth: Option<AuthSession>,
    ) -> (SignalSenders, Self) {
        let (network_tx, network) = watch::channel(network_online);
        let (lifecycle_tx, lifecycle) = watch::channel(app);
        let (auth_tx, auth) = watch::channel(auth);

        (
            SignalSenders { network: network_tx, lifecycle: lifecycle_tx, auth: auth_tx },
            Self { network, lifecycle, auth },
        )
    }

    /// Current values, marking them seen.
    pub fn snapshot(&mut self) -> (LifecycleSnapshot, Option<AuthSession>) {
        let network_online = *self.network.borrow_and_update();
        let app = *self.lifecycle.borrow_and_update();
        let session = self.auth.borrow_and_update().clone();

        let snapshot = LifecycleSnapshot {
            network_online,
            app,
            user_id: session.as_ref().map(|s| s.user_id.clone()),
        };
        (snapshot, session)
    }
}

impl SignalSenders {
    /// Publish network reachability.
    pub fn set_online(&self, online: bool) {
        self.network.send_replace(online);
    }

    /// Publish the app lifecycle.
    pub fn set_lifecycle(&self, app: AppLifecycle) {
        self.lifecycle.send_replace(app);
    }

    /// Publish a new auth session, or sign out with `None`.
    pub fn set_auth(&self, session: Option<AuthSession>) {
        self.auth.send_replace(session);
    }
}
