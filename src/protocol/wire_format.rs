//! Wire format encoding and decoding.
//!
//! Implements the 10-byte sideband header:
//! ```text
//! ┌────────┬─────────┬───────────┬───────────┐
//! │ Kind   │ Version │ Sequence  │ Length    │
//! │ 1 byte │ 1 byte  │ uint32 BE │ uint32 BE │
//! └────────┴─────────┴───────────┴───────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{Result, SidebandError};

/// Header size in bytes (fixed, exactly 10).
pub const HEADER_SIZE: usize = 10;

/// The only protocol version this crate speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default maximum payload size (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Frame kinds.
pub mod kind {
    /// Client → remote. Payload is the session token (UTF-8).
    pub const HELLO: u8 = 0x01;
    /// Remote → client. Empty; the token was accepted.
    pub const READY: u8 = 0x02;
    /// Client → remote. MsgPack `SidebandValues` for the write set.
    pub const WRITE: u8 = 0x03;
    /// Remote → client. MsgPack `SidebandValues` for the read set.
    pub const READ: u8 = 0x04;
    /// Client → remote. Empty; end of stream.
    pub const CANCEL: u8 = 0x05;
    /// Remote → client. MsgPack string describing the failure.
    pub const ERROR: u8 = 0x06;

    /// Whether `kind` is one of the known frame kinds.
    #[inline]
    pub fn is_known(kind: u8) -> bool {
        (HELLO..=ERROR).contains(&kind)
    }

    pub fn name(kind: u8) -> &'static str {
        match kind {
            HELLO => "HELLO",
            READY => "READY",
            WRITE => "WRITE",
            READ => "READ",
            CANCEL => "CANCEL",
            ERROR => "ERROR",
            _ => "UNKNOWN",
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame kind (see `kind` module).
    pub kind: u8,
    /// Protocol version, always [`PROTOCOL_VERSION`] when produced by us.
    pub version: u8,
    /// Iteration number; a `READ` echoes the sequence of its `WRITE`.
    pub sequence: u32,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a header at the current protocol version.
    pub fn new(kind: u8, sequence: u32, payload_length: u32) -> Self {
        Self {
            kind,
            version: PROTOCOL_VERSION,
            sequence,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use moniker_sideband::protocol::{kind, Header, HEADER_SIZE};
    ///
    /// let header = Header::new(kind::WRITE, 42, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// assert_eq!(bytes[0], kind::WRITE);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (10 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.kind;
        buf[1] = self.version;
        buf[2..6].copy_from_slice(&self.sequence.to_be_bytes());
        buf[6..10].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            kind: buf[0],
            version: buf[1],
            sequence: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
            payload_length: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Version is [`PROTOCOL_VERSION`]
    /// - Kind is known
    /// - Payload length doesn't exceed max
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(SidebandError::Protocol(format!(
                "Unsupported protocol version {}",
                self.version
            )));
        }

        if !kind::is_known(self.kind) {
            return Err(SidebandError::Protocol(format!(
                "Unknown frame kind 0x{:02X}",
                self.kind
            )));
        }

        if self.payload_length > max_payload_size {
            return Err(SidebandError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(())
    }
}
