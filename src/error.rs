//! Error types for moniker-sideband.

use thiserror::Error;

use crate::control::RemoteStatus;
use crate::moniker::DataShape;

/// Which half of a session a batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// Main error type for all sideband operations.
#[derive(Debug, Error)]
pub enum SidebandError {
    /// A control-plane call (create/start/begin/stop/clear) was rejected.
    #[error("Remote operation failed: {0}")]
    RemoteOperation(RemoteStatus),

    /// Sideband negotiation was rejected or the control channel was unreachable.
    #[error("Sideband negotiation failed: {0}")]
    Negotiation(RemoteStatus),

    /// The sideband endpoint could not be opened.
    #[error("Sideband transport unavailable at {endpoint}: {reason}")]
    TransportUnavailable { endpoint: String, reason: String },

    /// An in-flight Send/Receive was aborted by a local or remote close.
    #[error("Sideband transport closed")]
    TransportClosed,

    /// The session was used after Close. This is a programming error.
    #[error("Sideband session used after close ({operation})")]
    UseAfterClose { operation: &'static str },

    /// Send/Receive after the cancel batch went out.
    #[error("Sideband stream already cancelled")]
    CancelSent,

    /// A read payload does not match the shape bound to its slot.
    #[error("Read slot {slot}: expected {expected}, found {found}")]
    DecodeMismatch {
        slot: usize,
        expected: DataShape,
        found: DataShape,
    },

    /// A write payload does not match the shape bound to its slot.
    #[error("Write slot {slot}: expected {expected}, found {found}")]
    EncodeMismatch {
        slot: usize,
        expected: DataShape,
        found: DataShape,
    },

    /// A batch has the wrong number of payloads for its moniker set.
    #[error("{direction} batch has {found} payloads, expected {expected}")]
    BatchLength {
        direction: Direction,
        expected: usize,
        found: usize,
    },

    /// The same moniker was registered twice in one group.
    #[error("Duplicate moniker: {0}")]
    DuplicateMoniker(String),

    /// Protocol error (invalid frame, out-of-order reply, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error on the sideband socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (control plane).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

impl SidebandError {
    /// The remote status behind a control-plane failure, if any.
    pub fn status(&self) -> Option<&RemoteStatus> {
        match self {
            SidebandError::RemoteOperation(status) | SidebandError::Negotiation(status) => {
                Some(status)
            }
            _ => None,
        }
    }
}

/// Result type alias using SidebandError.
pub type Result<T> = std::result::Result<T, SidebandError>;
