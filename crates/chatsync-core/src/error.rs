//! Error types for the chat sync core.
//!
//! Transport failures are classified rather than merely reported: the
//! classification decides between backing off, suspending until the user
//! signs in again, and waiting for the next lifecycle change.

use std::time::Duration;

use thiserror::Error;

/// Failures reported by a transport for connect or send.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Handshake or send did not complete in time.
    #[error("timed out after {elapsed:?}")]
    Timeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Socket-level failure (reset, refused, DNS, ...).
    #[error("i/o error: {0}")]
    Io(String),

    /// Channel is not open.
    #[error("transport closed")]
    Closed,

    /// Credentials were rejected. Terminal for the current session.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Backend refused the request for a non-auth reason.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Backend closed the channel on purpose and asked us not to come back.
    #[error("server closed connection: {0}")]
    ServerClosed(String),
}

impl TransportError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Transient errors are timeouts and socket failures. Auth failures,
    /// rejections and server-initiated closes are never transient: retrying
    /// them without a change in circumstances cannot succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io(_) | Self::Closed)
    }

    /// Returns true if this error means the session's credentials are dead.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Invalid configuration values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Base delay must be non-zero and not exceed the cap.
    #[error("invalid backoff: base {base:?} must be in (0, {cap:?}]")]
    InvalidBackoff {
        /// Configured base delay
        base: Duration,
        /// Configured maximum delay
        cap: Duration,
    },

    /// Jitter is a fraction in `[0, 1)`.
    #[error("invalid jitter {0}: must be in [0, 1)")]
    InvalidJitter(f64),

    /// A capacity or budget that must be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_transient() {
        assert!(TransportError::Timeout { elapsed: Duration::from_secs(10) }.is_transient());
        assert!(TransportError::Io("connection reset".to_string()).is_transient());
        assert!(TransportError::Closed.is_transient());
    }

    #[test]
    fn refusals_are_fatal() {
        assert!(!TransportError::Unauthorized("token expired".to_string()).is_transient());
        assert!(!TransportError::Rejected("room archived".to_string()).is_transient());
        assert!(!TransportError::ServerClosed("kicked".to_string()).is_transient());
    }

    #[test]
    fn only_unauthorized_is_auth() {
        assert!(TransportError::Unauthorized("token expired".to_string()).is_auth());
        assert!(!TransportError::Rejected("nope".to_string()).is_auth());
        assert!(!TransportError::Closed.is_auth());
    }
}
