//! Identifiers and the error type shared by every far-memory component.

#![forbid(unsafe_code)]

use std::fmt;
use std::io;

/// Identifier of one far-memory object, unique within a runtime instance.
///
/// `ObjectId(0)` is reserved and never handed out; bucket chains use it as the
/// end-of-chain link.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct ObjectId(pub u64);

/// Sequence number stamped on every request sent to the remote pool.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct SeqNo(pub u64);

impl ObjectId {
    /// The reserved "no object" identifier.
    pub const NONE: ObjectId = ObjectId(0);

    /// Returns true for the reserved identifier.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ObjectId {
    fn from(value: u64) -> Self {
        ObjectId(value)
    }
}

impl From<ObjectId> for u64 {
    fn from(value: ObjectId) -> Self {
        value.0
    }
}

/// Errors surfaced by the far-memory runtime.
#[derive(thiserror::Error, Debug)]
pub enum FarMemError {
    /// Local budget exhausted even after evicting every unpinned object.
    #[error("out of local memory: requested {requested} bytes, capacity {capacity} bytes")]
    OutOfLocalMemory {
        /// Bytes the failed allocation asked for.
        requested: usize,
        /// Configured local capacity.
        capacity: usize,
    },
    /// The remote pool did not answer within the retry budget.
    #[error("remote unavailable for object {object} after {attempts} attempts")]
    RemoteUnavailable {
        /// Object the failed request targeted.
        object: ObjectId,
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// The remote pool answered with an error status.
    #[error("remote error: {0}")]
    Remote(String),
    /// A frame could not be decoded.
    #[error("protocol: {0}")]
    Protocol(&'static str),
    /// Transport I/O failure.
    #[error("IO: {0}")]
    Io(#[from] io::Error),
    /// Caller supplied an argument the runtime can not honor.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Options failed validation.
    #[error("config: {0}")]
    Config(String),
    /// An in-flight operation was torn down before it settled.
    #[error("in-flight operation abandoned")]
    Abandoned,
}

impl Clone for FarMemError {
    fn clone(&self) -> Self {
        match self {
            FarMemError::OutOfLocalMemory {
                requested,
                capacity,
            } => FarMemError::OutOfLocalMemory {
                requested: *requested,
                capacity: *capacity,
            },
            FarMemError::RemoteUnavailable { object, attempts } => {
                FarMemError::RemoteUnavailable {
                    object: *object,
                    attempts: *attempts,
                }
            }
            FarMemError::Remote(msg) => FarMemError::Remote(msg.clone()),
            FarMemError::Protocol(msg) => FarMemError::Protocol(msg),
            FarMemError::Io(err) => FarMemError::Io(io::Error::new(err.kind(), err.to_string())),
            FarMemError::InvalidArgument(msg) => FarMemError::InvalidArgument(msg.clone()),
            FarMemError::Config(msg) => FarMemError::Config(msg.clone()),
            FarMemError::Abandoned => FarMemError::Abandoned,
        }
    }
}

impl FarMemError {
    /// Returns true when retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FarMemError::Io(_) | FarMemError::Protocol(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FarMemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloned_io_error_keeps_kind() {
        let err = FarMemError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        match err.clone() {
            FarMemError::Io(inner) => assert_eq!(inner.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected clone {other:?}"),
        }
    }

    #[test]
    fn reserved_object_id() {
        assert!(ObjectId::NONE.is_none());
        assert_eq!(ObjectId::default(), ObjectId::NONE);
        assert!(!ObjectId(7).is_none());
        assert_eq!(ObjectId::from(7u64).to_string(), "7");
    }
}
