//! Frame writing with scatter/gather I/O.
//!
//! A session sends at most one frame per iteration, so there is no writer
//! task: the caller holds the write half and writes header and payload in one
//! `write_vectored` call, falling back to a resume loop on partial writes.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SidebandError};
use crate::protocol::{Header, HEADER_SIZE};

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header (10 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (empty for `READY` and `CANCEL`).
    pub payload: Bytes,
}

impl OutboundFrame {
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Frame of `kind` whose length field matches `payload`.
    #[inline]
    pub fn with_payload(kind: u8, sequence: u32, payload: Vec<u8>) -> Self {
        let header = Header::new(kind, sequence, payload.len() as u32);
        Self::new(&header, Bytes::from(payload))
    }

    #[inline]
    pub fn empty(kind: u8, sequence: u32) -> Self {
        Self {
            header: Header::new(kind, sequence, 0).encode(),
            payload: Bytes::new(),
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Write frames using scatter/gather I/O, then flush.
pub async fn write_frames<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if batch.is_empty() {
        return Ok(());
    }

    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);
    for frame in batch {
        slices.push(IoSlice::new(&frame.header));
        if !frame.payload.is_empty() {
            slices.push(IoSlice::new(&frame.payload));
        }
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();

    // Fast path: the kernel took everything in one call
    let written = writer.write_vectored(&slices).await?;
    if written == total_size {
        writer.flush().await?;
        return Ok(());
    }

    if written == 0 {
        return Err(write_zero());
    }

    let mut total_written = written;
    while total_written < total_size {
        let remaining_slices = build_remaining_slices(batch, total_written);
        if remaining_slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&remaining_slices).await?;
        if written == 0 {
            return Err(write_zero());
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

fn write_zero() -> SidebandError {
    SidebandError::Io(std::io::Error::new(
        std::io::ErrorKind::WriteZero,
        "write_vectored returned 0",
    ))
}

/// Build IoSlice array for remaining data after partial write.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let header_start = skipped;
        let header_end = skipped + HEADER_SIZE;

        if skip_bytes < header_end {
            let start_in_header = skip_bytes.saturating_sub(header_start);
            slices.push(IoSlice::new(&frame.header[start_in_header..]));
        }
        skipped = header_end;

        if !frame.payload.is_empty() {
            let payload_start = skipped;
            let payload_end = skipped + frame.payload.len();

            if skip_bytes < payload_end {
                let start_in_payload = skip_bytes.saturating_sub(payload_start);
                slices.push(IoSlice::new(&frame.payload[start_in_payload..]));
            }
            skipped = payload_end;
        }
    }

    slices
}
