// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the protocol engine.
//!
//! Errors are grouped by how the participant reacts to them:
//!
//! | Category | Examples | Reaction |
//! |----------|----------|----------|
//! | Malformed | corrupt envelope, bad version | log, drop message |
//! | Resource | history full, pool exhausted | returned to caller |
//! | PeerViolation | sequence regression, conflicting Guid | tear down peer proxy |
//! | Fatal | two live local entities sharing a Guid | participant goes `Failed` |
//!
//! Stale or duplicate input is not an error at all: the database returns
//! `false` and the proxy cache reports `Unchanged`.

use crate::core::guid::Guid;

/// Coarse classification used by the participant to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unparseable or incompatible input; dropped without state mutation.
    Malformed,
    /// Recoverable resource exhaustion surfaced to the caller.
    Resource,
    /// A remote peer broke the protocol; its state is discarded.
    PeerViolation,
    /// Local invariant broken; the participant must stop.
    Fatal,
    /// Configuration, state and collaborator failures.
    Other,
}

/// Engine error.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Malformed input
    // ========================================================================
    /// Message or proxy data could not be interpreted.
    Malformed(String),
    /// Remote protocol version is not supported.
    IncompatibleVersion { major: u8, minor: u8 },
    /// Codec failed to encode or decode an envelope.
    Codec(String),

    // ========================================================================
    // Resource errors
    // ========================================================================
    /// History is full and the writer is configured not to block.
    WouldBlock,
    /// History stayed full for the whole `max_blocking_time`.
    WriteTimeout,
    /// A configured resource limit would be exceeded.
    ResourceLimitExceeded(String),
    /// Payload pool could not provide a buffer.
    PoolExhausted { requested: usize },

    // ========================================================================
    // Peer violations
    // ========================================================================
    /// Remote entity broke the protocol (sequence regression, Guid conflict).
    ProtocolViolation { peer: Guid, reason: String },

    // ========================================================================
    // Fatal
    // ========================================================================
    /// Local invariant broken; continuing would risk delivering to the wrong identity.
    InvariantViolation(String),

    // ========================================================================
    // Other errors
    // ========================================================================
    /// Invalid configuration value.
    Config(String),
    /// Operation not allowed in the current state.
    InvalidState(String),
    /// No local entity with this Guid.
    UnknownEntity(Guid),
    /// Transport collaborator failure.
    Transport(String),
    /// Persistence collaborator failure.
    Persistence(String),
    /// I/O error with underlying cause.
    Io(std::io::Error),
}

impl Error {
    /// Classify this error for the recovery policy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Malformed(_) | Error::IncompatibleVersion { .. } | Error::Codec(_) => {
                ErrorCategory::Malformed
            }
            Error::WouldBlock
            | Error::WriteTimeout
            | Error::ResourceLimitExceeded(_)
            | Error::PoolExhausted { .. } => ErrorCategory::Resource,
            Error::ProtocolViolation { .. } => ErrorCategory::PeerViolation,
            Error::InvariantViolation(_) => ErrorCategory::Fatal,
            Error::Config(_)
            | Error::InvalidState(_)
            | Error::UnknownEntity(_)
            | Error::Transport(_)
            | Error::Persistence(_)
            | Error::Io(_) => ErrorCategory::Other,
        }
    }

    /// True when the error must escalate to the participant.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Fatal
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Malformed
            Error::Malformed(msg) => write!(f, "Malformed input: {}", msg),
            Error::IncompatibleVersion { major, minor } => {
                write!(f, "Incompatible protocol version {}.{}", major, minor)
            }
            Error::Codec(msg) => write!(f, "Codec error: {}", msg),
            // Resource
            Error::WouldBlock => write!(f, "Operation would exceed resource limits"),
            Error::WriteTimeout => write!(f, "Write blocked past max_blocking_time"),
            Error::ResourceLimitExceeded(msg) => write!(f, "Resource limit exceeded: {}", msg),
            Error::PoolExhausted { requested } => {
                write!(f, "Payload pool exhausted ({} bytes requested)", requested)
            }
            // Peer
            Error::ProtocolViolation { peer, reason } => {
                write!(f, "Protocol violation by {}: {}", peer, reason)
            }
            // Fatal
            Error::InvariantViolation(msg) => write!(f, "Invariant violation: {}", msg),
            // Other
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::UnknownEntity(guid) => write!(f, "Unknown entity {}", guid),
            Error::Transport(msg) => write!(f, "Transport error: {}", msg),
            Error::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

/// Convenient alias for engine results.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::WouldBlock.category(), ErrorCategory::Resource);
        assert_eq!(
            Error::Malformed("x".into()).category(),
            ErrorCategory::Malformed
        );
        assert_eq!(
            Error::ProtocolViolation {
                peer: Guid::UNKNOWN,
                reason: "regression".into()
            }
            .category(),
            ErrorCategory::PeerViolation
        );
        assert!(Error::InvariantViolation("dup".into()).is_fatal());
        assert!(!Error::WriteTimeout.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = Error::PoolExhausted { requested: 64 };
        assert!(err.to_string().contains("64"));

        let err = Error::IncompatibleVersion { major: 1, minor: 0 };
        assert_eq!(err.to_string(), "Incompatible protocol version 1.0");
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error as _;
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(err.source().is_some());
    }
}
