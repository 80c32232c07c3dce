//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must always hold during execution. Unlike
//! example-based tests that check specific scenarios, they are checked after
//! every step of generated event sequences.
//!
//! # Architecture
//!
//! Observable state of a reconciler, read model and connection health is
//! extracted into a [`SystemSnapshot`], then every registered [`Invariant`]
//! runs against it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = SystemSnapshot::capture(bridge.reconciler(), bridge.read_model(), &health);
//! registry.assert_all(&snapshot, "after reconnect");
//! ```

mod checks;
mod snapshot;

pub use checks::{
    ConnectedResetsAttempts, LastMessageIsNewest, MessagesSorted, NoDuplicateClientIds,
    NoDuplicateIds, ReadModelMatchesCache, RoomsSortedByRecency, SuspendedHasReason,
};
pub use snapshot::{RoomSnapshot, SystemSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// An invariant that can be checked against system state.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against a snapshot.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;

    /// Violation carrying this invariant's name.
    fn violation(&self, message: String) -> Violation {
        Violation { invariant: self.name(), message }
    }
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every standard invariant.
    ///
    /// Includes:
    /// - [`MessagesSorted`]: rooms ascend by (timestamp, id)
    /// - [`NoDuplicateIds`]: a message id appears once per room
    /// - [`NoDuplicateClientIds`]: one record per local send
    /// - [`LastMessageIsNewest`]: room preview matches the tail
    /// - [`RoomsSortedByRecency`]: room list is newest first
    /// - [`ReadModelMatchesCache`]: projection equals the store
    /// - [`ConnectedResetsAttempts`]: Connected implies zero attempts
    /// - [`SuspendedHasReason`]: Suspended iff a reason is set
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(MessagesSorted);
        registry.add(NoDuplicateIds);
        registry.add(NoDuplicateClientIds);
        registry.add(LastMessageIsNewest);
        registry.add(RoomsSortedByRecency);
        registry.add(ReadModelMatchesCache);
        registry.add(ConnectedResetsAttempts);
        registry.add(SuspendedHasReason);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants, collecting every violation.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
