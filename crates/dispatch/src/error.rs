// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by dispatch operations.
//!
//! Only caller-facing failures live here. Gossip parse failures never leave
//! the event loop (see [`crate::directory::protocol::ProtocolError`]).

use std::fmt;

/// Errors returned by dispatch operations.
///
/// # Example
///
/// ```rust
/// use dispatch::{Error, TopicStore, TopicRecord, Pattern};
/// use std::collections::BTreeSet;
///
/// let mut store = TopicStore::new("me");
/// let topic = TopicRecord::new("a", Pattern::Pub, "tcp://127.0.0.1:1", BTreeSet::new(), BTreeSet::new(), "me");
/// store.add(topic.clone()).expect("first registration");
///
/// match store.add(topic) {
///     Err(Error::DuplicateTopic(name)) => assert_eq!(name, "a"),
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Registration Errors
    // ========================================================================
    /// A local topic with this name is already registered.
    DuplicateTopic(String),
    /// Configuration value rejected.
    InvalidConfig(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Failed to bind the discovery socket.
    BindFailed(String),
    /// Failed to join the discovery multicast group.
    MulticastJoinFailed(String),
    /// I/O error with underlying cause.
    IoError(std::io::Error),
    /// Encoded gossip datagram does not fit the datagram buffer.
    DatagramTooLarge(usize),

    // ========================================================================
    // Framing Errors
    // ========================================================================
    /// Requested schema type does not match the type id carried by the message.
    TypeMismatch {
        /// Type id the caller asked for.
        expected: u64,
        /// Type id found in the message.
        actual: u64,
    },
    /// Multi-part message has fewer parts than required.
    MissingParts(usize),
    /// Segment table or payload could not be decoded.
    MalformedFrame(String),
    /// Heap allocation for an oversized segment failed (bytes requested).
    OutOfMemory(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DuplicateTopic(name) => write!(f, "Duplicate topic: {}", name),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::BindFailed(msg) => write!(f, "Bind failed: {}", msg),
            Error::MulticastJoinFailed(msg) => write!(f, "Multicast join failed: {}", msg),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::DatagramTooLarge(len) => {
                write!(f, "Datagram of {} bytes exceeds the event buffer", len)
            }
            Error::TypeMismatch { expected, actual } => write!(
                f,
                "Type mismatch: requested {} but message carries {}",
                expected, actual
            ),
            Error::MissingParts(count) => {
                write!(f, "Message has {} parts, at least 2 required", count)
            }
            Error::MalformedFrame(msg) => write!(f, "Malformed frame: {}", msg),
            Error::OutOfMemory(bytes) => write!(f, "Allocation of {} bytes failed", bytes),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Convenient alias for results using the crate [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_type_mismatch() {
        let err = Error::TypeMismatch {
            expected: 1,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "Type mismatch: requested 1 but message carries 2"
        );
    }

    #[test]
    fn test_io_error_source() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(std::error::Error::source(&err).is_some());
        assert!(std::error::Error::source(&Error::MissingParts(1)).is_none());
    }
}
