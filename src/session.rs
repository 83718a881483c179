//! A negotiated, open sideband session.

use std::sync::atomic::AtomicUsize;

use futures::stream::BoxStream;
use tracing::debug;

use crate::codec::{SidebandValues, TypedPayload};
use crate::config::SidebandConfig;
use crate::control::ControlChannel;
use crate::error::Result;
use crate::moniker::{MonikerGroup, SlotLayout};
use crate::negotiate::{negotiate, Negotiated, SessionToken, Strategy};
use crate::stream::{self, ReadBatch, WriteValues};
use crate::transport::{CloseHandle, SidebandTransport};

/// Transport plus the slot layout fixed at negotiation.
///
/// Owned by one streaming loop. All methods take `&self`, so the session can
/// be put behind an `Arc` and closed from another task while a receive is
/// pending.
///
/// # Example
///
/// ```ignore
/// use moniker_sideband::{MonikerGroup, SidebandConfig, SidebandSession, Strategy, stream};
///
/// let session = SidebandSession::establish(&control, group, Strategy::Sockets, &config).await?;
/// let mut batches = session.run(5, stream::repeat(vec![TypedPayload::scalar(1.0f64)]));
/// while let Some(batch) = batches.next().await {
///     println!("{:?}", batch?.slot::<f64>(0)?);
/// }
/// ```
#[derive(Debug)]
pub struct SidebandSession {
    transport: SidebandTransport,
    layout: SlotLayout,
    strategy: Strategy,
    received: AtomicUsize,
}

impl SidebandSession {
    /// Negotiate `group` over `control` and open the data channel.
    pub async fn establish(
        control: &dyn ControlChannel,
        group: MonikerGroup,
        strategy: Strategy,
        config: &SidebandConfig,
    ) -> Result<Self> {
        let negotiated = negotiate(control, group, strategy).await?;
        Self::open(negotiated, config).await
    }

    /// Open the data channel for an already negotiated session.
    pub async fn open(negotiated: Negotiated, config: &SidebandConfig) -> Result<Self> {
        let transport =
            SidebandTransport::open(&negotiated.token, &negotiated.params, config).await?;
        debug!(
            reads = negotiated.layout.read_len(),
            writes = negotiated.layout.write_len(),
            "Sideband session ready"
        );
        Ok(Self::from_transport(
            transport,
            negotiated.layout,
            negotiated.params.strategy,
        ))
    }

    pub(crate) fn from_transport(
        transport: SidebandTransport,
        layout: SlotLayout,
        strategy: Strategy,
    ) -> Self {
        Self {
            transport,
            layout,
            strategy,
            received: AtomicUsize::new(0),
        }
    }

    pub fn layout(&self) -> &SlotLayout {
        &self.layout
    }

    pub fn token(&self) -> &SessionToken {
        self.transport.token()
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn transport(&self) -> &SidebandTransport {
        &self.transport
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Send one write batch, validated against the write set.
    pub async fn send(&self, values: Vec<TypedPayload>) -> Result<()> {
        stream::validate_write(&self.layout, &values)?;
        self.transport.send(&SidebandValues::new(values)).await
    }

    /// Receive and decode the next read batch.
    pub async fn receive(&self) -> Result<ReadBatch> {
        stream::receive(&self.transport, &self.layout, &self.received).await
    }

    /// One send + receive round.
    pub async fn iterate(&self, values: Vec<TypedPayload>) -> Result<ReadBatch> {
        stream::iterate(&self.transport, &self.layout, &self.received, values).await
    }

    /// Stream `n` iterations, pulling write batches from `provider`.
    ///
    /// Iteration numbers continue from earlier [`iterate`](Self::iterate)
    /// and [`receive`](Self::receive) calls. See [`stream::run_iterations`].
    pub fn run<'a, P>(&'a self, n: usize, provider: P) -> BoxStream<'a, Result<ReadBatch>>
    where
        P: WriteValues + Send + 'a,
    {
        stream::run_iterations(&self.transport, &self.layout, &self.received, n, provider)
    }

    /// Send the cancel flag. Receive must not be called afterwards.
    pub async fn cancel(&self) -> Result<()> {
        self.transport.send_cancel().await
    }

    /// Close the data channel. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.transport.close_handle()
    }
}
