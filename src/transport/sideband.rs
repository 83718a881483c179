//! The sideband transport: a token-addressed, framed data connection.
//!
//! # Lifecycle
//!
//! ```text
//! open ──► Open ──send_cancel──► CancelSent ──close──► Closed
//!            └──────────────────close──────────────────┘
//! ```
//!
//! Every operation takes `&self`, so a session can be shared with a task
//! that closes it. Close cancels a token that every blocking read or write
//! selects on: an in-flight `receive` returns
//! [`SidebandError::TransportClosed`] instead of waiting for the remote.
//! Any call made after Close is [`SidebandError::UseAfterClose`].

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::reader::FrameReader;
use super::socket::{self, BoxedReader, BoxedWriter, Endpoint};
use super::writer::{write_frames, OutboundFrame};
use crate::codec::{MsgPackCodec, SidebandValues};
use crate::config::SidebandConfig;
use crate::error::{Result, SidebandError};
use crate::negotiate::{SessionToken, TransportParams};
use crate::protocol::{kind, Frame, Header};

const STATE_OPEN: u8 = 0;
const STATE_CANCEL_SENT: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// State shared with [`CloseHandle`]s.
struct Shared {
    state: AtomicU8,
    closed: CancellationToken,
}

impl Shared {
    /// Mark closed and wake every blocked operation. True on the first call.
    fn close(&self) -> bool {
        let previous = self.state.swap(STATE_CLOSED, Ordering::AcqRel);
        self.closed.cancel();
        previous != STATE_CLOSED
    }
}

/// Cloneable, synchronous trigger for closing a transport from elsewhere.
///
/// Intended for signal handlers and UI threads. Closing through the handle
/// unblocks any in-flight operation; call
/// [`SidebandTransport::close`] afterwards to flush and release the socket.
#[derive(Clone)]
pub struct CloseHandle {
    shared: Arc<Shared>,
}

impl CloseHandle {
    pub fn close(&self) {
        if self.shared.close() {
            debug!("Sideband close requested through handle");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == STATE_CLOSED
    }
}

/// An open sideband connection bound to one session token.
pub struct SidebandTransport {
    token: SessionToken,
    endpoint: Endpoint,
    shared: Arc<Shared>,
    reader: Mutex<Option<ReadSide>>,
    writer: Mutex<Option<BoxedWriter>>,
    next_sequence: AtomicU32,
    close_timeout: Duration,
    max_payload_size: u32,
}

struct ReadSide {
    frames: FrameReader<BoxedReader>,
    received: u32,
}

impl SidebandTransport {
    /// Connect to the negotiated endpoint and present the session token.
    ///
    /// Connect and handshake together are bounded by the configured connect
    /// timeout.
    ///
    /// # Errors
    ///
    /// [`SidebandError::TransportUnavailable`] if the endpoint cannot be
    /// reached, rejects the token, or does not answer in time.
    pub async fn open(
        token: &SessionToken,
        params: &TransportParams,
        config: &SidebandConfig,
    ) -> Result<Self> {
        let unavailable = |reason: String| SidebandError::TransportUnavailable {
            endpoint: params.connection_url.clone(),
            reason,
        };

        let endpoint =
            Endpoint::parse(&params.connection_url).map_err(|e| unavailable(e.to_string()))?;

        let handshake = Self::handshake(&endpoint, token, params, config);
        let (frames, writer) = match tokio::time::timeout(config.connect_timeout(), handshake).await
        {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => return Err(unavailable(e.to_string())),
            Err(_) => {
                return Err(unavailable(format!(
                    "no answer within {:?}",
                    config.connect_timeout()
                )))
            }
        };

        info!(
            token = %token.fingerprint(),
            endpoint = %endpoint,
            strategy = %params.strategy,
            "Sideband transport open"
        );

        Ok(Self::from_halves(token.clone(), endpoint, frames, writer, config))
    }

    /// Wrap halves that already completed the handshake.
    pub(crate) fn from_halves(
        token: SessionToken,
        endpoint: Endpoint,
        frames: FrameReader<BoxedReader>,
        writer: BoxedWriter,
        config: &SidebandConfig,
    ) -> Self {
        Self {
            token,
            endpoint,
            shared: Arc::new(Shared {
                state: AtomicU8::new(STATE_OPEN),
                closed: CancellationToken::new(),
            }),
            reader: Mutex::new(Some(ReadSide {
                frames,
                received: 0,
            })),
            writer: Mutex::new(Some(writer)),
            next_sequence: AtomicU32::new(1),
            close_timeout: config.close_timeout(),
            max_payload_size: config.max_payload_size(),
        }
    }

    async fn handshake(
        endpoint: &Endpoint,
        token: &SessionToken,
        params: &TransportParams,
        config: &SidebandConfig,
    ) -> Result<(FrameReader<BoxedReader>, BoxedWriter)> {
        let (read, mut write) = socket::connect(endpoint, params.strategy).await?;
        let mut frames = FrameReader::new(read, config);

        let hello = OutboundFrame::with_payload(kind::HELLO, 0, token.as_str().as_bytes().to_vec());
        write_frames(&mut write, &[hello]).await?;

        let reply = frames.next_frame().await?;
        match reply.kind() {
            kind::READY => Ok((frames, write)),
            kind::ERROR => Err(SidebandError::Protocol(remote_message(&reply))),
            _ => Err(SidebandError::Protocol(format!(
                "Expected READY, got {}",
                reply.kind_name()
            ))),
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == STATE_CLOSED
    }

    fn check_usable(&self, operation: &'static str) -> Result<()> {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_OPEN => Ok(()),
            STATE_CANCEL_SENT => Err(SidebandError::CancelSent),
            _ => Err(SidebandError::UseAfterClose { operation }),
        }
    }

    /// Send one write batch as a single `WRITE` frame.
    ///
    /// # Errors
    ///
    /// [`SidebandError::Protocol`] if the encoded batch is larger than the
    /// configured maximum payload. Nothing is written and the transport stays
    /// usable.
    pub async fn send(&self, values: &SidebandValues) -> Result<()> {
        self.check_usable("send")?;

        let payload = MsgPackCodec::encode(values)?;
        let length = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= self.max_payload_size)
            .ok_or_else(|| {
                SidebandError::Protocol(format!(
                    "Write batch of {} bytes exceeds maximum {}",
                    payload.len(),
                    self.max_payload_size
                ))
            })?;
        let sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel);
        let header = Header::new(kind::WRITE, sequence, length);
        trace!(sequence, slots = values.values.len(), "Sending write batch");

        self.write_frame(OutboundFrame::new(&header, Bytes::from(payload)))
            .await
    }

    /// Block until the next complete read batch arrives.
    ///
    /// Never returns a partial batch. No timeout is applied; wrap the call if
    /// one is needed.
    pub async fn receive(&self) -> Result<SidebandValues> {
        self.check_usable("receive")?;
        let closed = &self.shared.closed;

        let mut guard = tokio::select! {
            biased;
            _ = closed.cancelled() => return Err(SidebandError::TransportClosed),
            guard = self.reader.lock() => guard,
        };
        let Some(side) = guard.as_mut() else {
            return Err(SidebandError::TransportClosed);
        };

        let frame = tokio::select! {
            biased;
            _ = closed.cancelled() => return Err(SidebandError::TransportClosed),
            frame = side.frames.next_frame() => frame.map_err(disconnect_as_closed)?,
        };

        match frame.kind() {
            kind::READ => {
                side.received += 1;
                if frame.sequence() != side.received {
                    return Err(SidebandError::Protocol(format!(
                        "Read batch {} arrived out of order (expected {})",
                        frame.sequence(),
                        side.received
                    )));
                }
                trace!(sequence = frame.sequence(), "Read batch received");
                MsgPackCodec::decode(frame.payload())
            }
            kind::ERROR => {
                let message = remote_message(&frame);
                warn!(token = %self.token.fingerprint(), %message, "Remote reported sideband error");
                Err(SidebandError::Protocol(message))
            }
            _ => Err(SidebandError::Protocol(format!(
                "Unexpected {} frame on sideband stream",
                frame.kind_name()
            ))),
        }
    }

    /// Send the cancel flag. No further send or receive is allowed.
    ///
    /// Sending cancel twice is a no-op.
    pub async fn send_cancel(&self) -> Result<()> {
        match self.shared.state.compare_exchange(
            STATE_OPEN,
            STATE_CANCEL_SENT,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STATE_CANCEL_SENT) => return Ok(()),
            Err(_) => return Err(SidebandError::UseAfterClose { operation: "cancel" }),
        }

        let sequence = self.next_sequence.load(Ordering::Acquire);
        self.write_frame(OutboundFrame::empty(kind::CANCEL, sequence))
            .await?;
        info!(token = %self.token.fingerprint(), "Sideband cancel sent");
        Ok(())
    }

    async fn write_frame(&self, frame: OutboundFrame) -> Result<()> {
        let closed = &self.shared.closed;

        let mut guard = tokio::select! {
            biased;
            _ = closed.cancelled() => return Err(SidebandError::TransportClosed),
            guard = self.writer.lock() => guard,
        };
        let Some(writer) = guard.as_mut() else {
            return Err(SidebandError::TransportClosed);
        };

        tokio::select! {
            biased;
            _ = closed.cancelled() => Err(SidebandError::TransportClosed),
            written = write_frames(writer, std::slice::from_ref(&frame)) => {
                written.map_err(disconnect_as_closed)
            }
        }
    }

    /// Close the connection. Idempotent.
    ///
    /// Unblocks in-flight operations immediately, then shuts down the write
    /// half within the configured close timeout and drops both halves.
    ///
    /// # Errors
    ///
    /// An I/O failure or timeout while shutting down the write half. The
    /// transport is closed either way.
    pub async fn close(&self) -> Result<()> {
        if self.shared.close() {
            info!(token = %self.token.fingerprint(), "Sideband transport closing");
        }

        let release = async {
            let writer = self.writer.lock().await.take();
            let shutdown = match writer {
                Some(mut writer) => writer.shutdown().await,
                None => Ok(()),
            };
            self.reader.lock().await.take();
            shutdown
        };

        match tokio::time::timeout(self.close_timeout, release).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if is_disconnect(&e) => {
                debug!(error = %e, "Remote already gone at close");
                Ok(())
            }
            Ok(Err(e)) => Err(SidebandError::Io(e)),
            Err(_) => {
                warn!(timeout = ?self.close_timeout, "Sideband close timed out");
                Err(SidebandError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("close did not complete within {:?}", self.close_timeout),
                )))
            }
        }
    }
}

impl std::fmt::Debug for SidebandTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidebandTransport")
            .field("token", &self.token)
            .field("endpoint", &self.endpoint)
            .field("state", &self.shared.state.load(Ordering::Relaxed))
            .finish()
    }
}

fn remote_message(frame: &Frame) -> String {
    MsgPackCodec::decode::<String>(frame.payload())
        .unwrap_or_else(|_| "remote error (undecodable)".to_string())
}

fn is_disconnect(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

fn disconnect_as_closed(err: SidebandError) -> SidebandError {
    match err {
        SidebandError::Io(e) if is_disconnect(&e) => SidebandError::TransportClosed,
        other => other,
    }
}
