//! Chat sync core.
//!
//! Sans-IO building blocks for keeping a realtime messaging channel alive
//! across network, app-lifecycle and authentication transitions.
//!
//! # Architecture
//!
//! Every component here is a pure state machine. Callers feed in events
//! (lifecycle signal changes, transport outcomes, ticks) together with an
//! [`env::Environment`] for time and randomness, and receive actions
//! ([`ConnectionAction`]) to execute. No component performs I/O, which keeps
//! the reconnect logic deterministic under simulation.
//!
//! # Components
//!
//! - [`ConnectionManager`]: decides when the channel should be up
//! - [`Backoff`]: exponential reconnect delays with bounded jitter
//! - [`ConnectionHealth`]: observable snapshot for UI and diagnostics
//! - [`TransportError`]: failure taxonomy driving retry decisions

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod connection;
pub mod env;
pub mod error;
pub mod health;
pub mod signals;

pub use backoff::Backoff;
pub use connection::{ConnectionAction, ConnectionConfig, ConnectionEvent, ConnectionManager};
pub use env::Environment;
pub use error::{ConfigError, TransportError};
pub use health::{ConnectionHealth, ConnectionState, SuspendReason};
pub use signals::{AppLifecycle, AuthSession, LifecycleSnapshot};
