//! Deterministic simulation harness for the chat sync core.
//!
//! In-memory implementations of the Environment, Transport and RoomDirectory
//! traits for reproducible testing under scripted network, lifecycle and
//! auth conditions. Run sessions under a paused tokio clock so backoff and
//! timeouts elapse in virtual time.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation of the cache for
//! server-originated messages. Pushes and pages are applied to both the model
//! and the reconciler, and their room contents are compared.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks WHAT must be true across all execution
//! paths. Use [`InvariantRegistry::standard()`] for the cache, projection and
//! health invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod model;
pub mod sim_directory;
pub mod sim_env;
pub mod sim_transport;

pub use invariants::{
    ConnectedResetsAttempts, Invariant, InvariantRegistry, InvariantResult, LastMessageIsNewest,
    MessagesSorted, NoDuplicateClientIds, NoDuplicateIds, ReadModelMatchesCache, RoomSnapshot,
    RoomsSortedByRecency, SuspendedHasReason, SystemSnapshot, Violation,
};
pub use model::ModelCache;
pub use sim_directory::SimDirectory;
pub use sim_env::SimEnv;
pub use sim_transport::{SendMode, SimTransport};
