//! Frame reading over any async byte stream.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::SidebandConfig;
use crate::error::{Result, SidebandError};
use crate::protocol::{Frame, FrameBuffer};

/// Pulls whole frames off a read half.
///
/// Cancel-safe between reads: bytes are only appended to the frame buffer
/// after a read completes.
pub struct FrameReader<R> {
    stream: R,
    frames: FrameBuffer,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(stream: R, config: &SidebandConfig) -> Self {
        Self {
            stream,
            frames: FrameBuffer::with_limits(
                config.read_buffer_size(),
                config.max_payload_size(),
            ),
            chunk: vec![0u8; config.read_buffer_size()],
        }
    }

    /// Next complete frame.
    ///
    /// End of stream, including one that cuts a frame short, is
    /// [`SidebandError::TransportClosed`].
    pub async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.frames.next_frame()? {
                return Ok(frame);
            }

            let n = self.stream.read(&mut self.chunk).await?;
            if n == 0 {
                if self.frames.is_mid_frame() {
                    tracing::debug!(buffered = self.frames.len(), "Stream ended mid-frame");
                }
                return Err(SidebandError::TransportClosed);
            }
            self.frames.extend(&self.chunk[..n]);
        }
    }
}
