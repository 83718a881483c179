//! Reassembly of sideband frames from arbitrary read chunks.
//!
//! Socket reads split frames anywhere. [`FrameBuffer`] keeps the unconsumed
//! bytes in one `BytesMut` and remembers whether the next thing it expects
//! is a header or the payload of an already validated header. Payloads are
//! split off the buffer without copying.
//!
//! # Example
//!
//! ```
//! use moniker_sideband::protocol::{build_frame, kind, FrameBuffer, Header};
//!
//! let bytes = build_frame(&Header::new(kind::READ, 1, 2), b"hi");
//!
//! let mut buffer = FrameBuffer::new();
//! assert!(buffer.push(&bytes[..4]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[4..]).unwrap();
//! assert_eq!(frames[0].payload(), b"hi");
//! ```

use bytes::{Buf, Bytes, BytesMut};

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

const DEFAULT_CAPACITY: usize = 64 * 1024;

/// What the buffer needs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Header,
    /// Header already consumed and validated.
    Payload(Header),
}

/// Accumulates incoming bytes and yields complete frames.
#[derive(Debug)]
pub struct FrameBuffer {
    pending: BytesMut,
    expect: Expect,
    max_payload_size: u32,
}

impl FrameBuffer {
    /// 64 KiB initial capacity, 64 MiB payload limit.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    pub fn with_limits(capacity: usize, max_payload_size: u32) -> Self {
        Self {
            pending: BytesMut::with_capacity(capacity),
            expect: Expect::Header,
            max_payload_size,
        }
    }

    /// Append `data` and drain every frame it completes.
    ///
    /// # Errors
    ///
    /// A header with a bad version, unknown kind or oversized payload. The
    /// buffer should be discarded afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.extend(data);
        std::iter::from_fn(|| self.next_frame().transpose()).collect()
    }

    /// Take one complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.expect {
                Expect::Header => {
                    let Some(header) = Header::decode(&self.pending) else {
                        return Ok(None);
                    };
                    header.validate(self.max_payload_size)?;
                    self.pending.advance(HEADER_SIZE);
                    self.expect = Expect::Payload(header);
                }
                Expect::Payload(header) => {
                    let len = header.payload_length as usize;
                    if self.pending.len() < len {
                        return Ok(None);
                    }
                    let payload = if len == 0 {
                        Bytes::new()
                    } else {
                        self.pending.split_to(len).freeze()
                    };
                    self.expect = Expect::Header;
                    return Ok(Some(Frame::new(header, payload)));
                }
            }
        }
    }

    /// Append without draining.
    pub fn extend(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Bytes buffered and not yet returned as part of a frame.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// True when part of a frame has been received.
    pub fn is_mid_frame(&self) -> bool {
        matches!(self.expect, Expect::Payload(_)) || !self.pending.is_empty()
    }

    /// Drop buffered bytes and expect a header again.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.expect = Expect::Header;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
