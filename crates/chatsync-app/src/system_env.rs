//! Production Environment implementation using system time and RNG.
//!
//! # Capabilities
//!
//! - Real monotonic time (`std::time::Instant`) for timers and backoff
//! - Unix wall-clock time for optimistic message timestamps
//! - OS RNG (getrandom) for jitter and client message ids
//! - Tokio async sleep for actual wall-clock delays

use std::time::Duration;

use chatsync_core::Environment;

/// Production environment using system time and the OS RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. Client message ids must be unique across
/// devices, so there is no sensible fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    /// A clock set before 1970 reads as 0; the reconciler still orders
    /// placeholders after the newest cached message.
    #[allow(clippy::disallowed_methods)]
    fn wall_clock_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
