//! Frame struct with typed accessors.
//!
//! Represents a complete sideband frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use moniker_sideband::protocol::{kind, Frame, Header};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Header::new(kind::READ, 3, 5), Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.kind(), kind::READ);
//! assert_eq!(frame.sequence(), 3);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{kind, Header, HEADER_SIZE};

/// A complete sideband frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a frame of `kind` around owned payload bytes.
    pub fn with_payload(kind: u8, sequence: u32, payload: Vec<u8>) -> Self {
        Self {
            header: Header::new(kind, sequence, payload.len() as u32),
            payload: Bytes::from(payload),
        }
    }

    /// A frame with no payload (`READY`, `CANCEL`).
    pub fn empty(kind: u8, sequence: u32) -> Self {
        Self::new(Header::new(kind, sequence, 0), Bytes::new())
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn kind(&self) -> u8 {
        self.header.kind
    }

    #[inline]
    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    #[inline]
    pub fn kind_name(&self) -> &'static str {
        kind::name(self.header.kind)
    }

    #[inline]
    pub fn is_read(&self) -> bool {
        self.header.kind == kind::READ
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.header.kind == kind::ERROR
    }

    #[inline]
    pub fn is_cancel(&self) -> bool {
        self.header.kind == kind::CANCEL
    }
}

/// Build a complete frame as a single byte vector.
///
/// Encodes header and appends payload into a contiguous buffer.
/// The transport writer uses vectored writes instead; this is for tests and
/// small control frames.
///
/// # Example
///
/// ```
/// use moniker_sideband::protocol::{build_frame, kind, Header, HEADER_SIZE};
///
/// let header = Header::new(kind::WRITE, 1, 5);
/// let bytes = build_frame(&header, b"hello");
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::with_payload(kind::WRITE, 7, b"data".to_vec());

        assert_eq!(frame.kind(), kind::WRITE);
        assert_eq!(frame.kind_name(), "WRITE");
        assert_eq!(frame.sequence(), 7);
        assert_eq!(frame.payload_len(), 4);
        assert_eq!(frame.header.payload_length, 4);
        assert!(!frame.is_read());
    }

    #[test]
    fn test_empty_frames() {
        let cancel = Frame::empty(kind::CANCEL, 3);
        assert!(cancel.is_cancel());
        assert!(cancel.payload().is_empty());
        assert_eq!(cancel.header.payload_length, 0);

        let error = Frame::empty(kind::ERROR, 0);
        assert!(error.is_error());
    }

    #[test]
    fn test_build_frame_roundtrip() {
        use super::super::FrameBuffer;

        let header = Header::new(kind::READ, 456, 10);
        let payload = b"0123456789";
        let bytes = build_frame(&header, payload);

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence(), 456);
        assert_eq!(frames[0].payload(), payload);
        assert!(frames[0].is_read());
    }

    #[test]
    fn test_build_frame_empty_payload() {
        let header = Header::new(kind::READY, 0, 0);
        assert_eq!(build_frame(&header, b"").len(), HEADER_SIZE);
    }
}
