//! The streaming loop: positional write → read exchange for N iterations.
//!
//! Payloads carry no moniker identity on the wire. Slot `i` of a write batch
//! belongs to the `i`-th write moniker fixed at negotiation, and slot `i` of
//! a read batch to the `i`-th read moniker. Every batch is checked against
//! the [`SlotLayout`] before it is sent and after it is received.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, warn};

use crate::codec::{Element, SidebandValues, TypedPayload};
use crate::error::{Direction, Result, SidebandError};
use crate::moniker::SlotLayout;
use crate::transport::SidebandTransport;

/// Supplies the write batch for each iteration.
///
/// Implemented for any `FnMut(usize) -> Vec<TypedPayload>`; the argument is
/// the 1-based iteration number on the session.
pub trait WriteValues {
    fn values(&mut self, iteration: usize) -> Vec<TypedPayload>;
}

impl<F> WriteValues for F
where
    F: FnMut(usize) -> Vec<TypedPayload>,
{
    fn values(&mut self, iteration: usize) -> Vec<TypedPayload> {
        self(iteration)
    }
}

/// Provider that writes the same batch every iteration.
#[derive(Debug, Clone)]
pub struct Repeat(Vec<TypedPayload>);

impl WriteValues for Repeat {
    fn values(&mut self, _iteration: usize) -> Vec<TypedPayload> {
        self.0.clone()
    }
}

/// Write `values` on every iteration.
pub fn repeat(values: Vec<TypedPayload>) -> Repeat {
    Repeat(values)
}

/// One decoded read batch, positionally bound to the read set.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadBatch {
    iteration: usize,
    values: Vec<TypedPayload>,
    layout: SlotLayout,
}

impl ReadBatch {
    /// 1-based position of this batch among all batches received on the
    /// session.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Payload of read slot `index`.
    pub fn get(&self, index: usize) -> Option<&TypedPayload> {
        self.values.get(index)
    }

    /// Typed view of read slot `index`.
    ///
    /// # Errors
    ///
    /// [`SidebandError::BatchLength`] if there is no such slot,
    /// [`SidebandError::DecodeMismatch`] if the slot holds another element type.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let batch = session.receive().await?;
    /// let samples: &[f64] = batch.slot(0)?;
    /// ```
    pub fn slot<T: Element>(&self, index: usize) -> Result<&[T]> {
        let payload = self.values.get(index).ok_or(SidebandError::BatchLength {
            direction: Direction::Read,
            expected: index + 1,
            found: self.values.len(),
        })?;
        let expected = self.layout.read()[index];
        payload.as_slice::<T>().ok_or(SidebandError::DecodeMismatch {
            slot: index,
            expected,
            found: payload.shape(),
        })
    }

    pub fn values(&self) -> &[TypedPayload] {
        &self.values
    }

    pub fn into_values(self) -> Vec<TypedPayload> {
        self.values
    }
}

/// Check a write batch against the write set before it reaches the wire.
pub fn validate_write(layout: &SlotLayout, values: &[TypedPayload]) -> Result<()> {
    if values.len() != layout.write_len() {
        return Err(SidebandError::BatchLength {
            direction: Direction::Write,
            expected: layout.write_len(),
            found: values.len(),
        });
    }
    for (slot, (payload, expected)) in values.iter().zip(layout.write()).enumerate() {
        if !payload.matches(expected) {
            return Err(SidebandError::EncodeMismatch {
                slot,
                expected: *expected,
                found: payload.shape(),
            });
        }
    }
    Ok(())
}

/// Bind a received batch to the read set.
pub fn decode_read(
    layout: &SlotLayout,
    received: SidebandValues,
    iteration: usize,
) -> Result<ReadBatch> {
    let values = received.values;
    if values.len() != layout.read_len() {
        return Err(SidebandError::BatchLength {
            direction: Direction::Read,
            expected: layout.read_len(),
            found: values.len(),
        });
    }
    for (slot, (payload, expected)) in values.iter().zip(layout.read()).enumerate() {
        if !payload.matches(expected) {
            return Err(SidebandError::DecodeMismatch {
                slot,
                expected: *expected,
                found: payload.shape(),
            });
        }
    }
    Ok(ReadBatch {
        iteration,
        values,
        layout: layout.clone(),
    })
}

/// One send + receive round.
///
/// `received` counts read batches taken off this transport; the batch is
/// numbered from it.
pub async fn iterate(
    transport: &SidebandTransport,
    layout: &SlotLayout,
    received: &AtomicUsize,
    values: Vec<TypedPayload>,
) -> Result<ReadBatch> {
    validate_write(layout, &values)?;
    transport.send(&SidebandValues::new(values)).await?;
    receive(transport, layout, received).await
}

/// Take the next read batch and number it from `received`.
pub async fn receive(
    transport: &SidebandTransport,
    layout: &SlotLayout,
    received: &AtomicUsize,
) -> Result<ReadBatch> {
    let values = transport.receive().await?;
    let iteration = received.fetch_add(1, Ordering::AcqRel) + 1;
    decode_read(layout, values, iteration)
}

/// Lazy, finite stream of `n` iterations.
///
/// Iterations continue the numbering in `received`, so a stream started
/// after earlier rounds on the same transport does not restart at 1. The
/// first error ends the stream; nothing is retried. Dropping the stream
/// early leaves the transport open for the caller to cancel and close.
pub fn run_iterations<'a, P>(
    transport: &'a SidebandTransport,
    layout: &'a SlotLayout,
    received: &'a AtomicUsize,
    n: usize,
    provider: P,
) -> BoxStream<'a, Result<ReadBatch>>
where
    P: WriteValues + Send + 'a,
{
    debug!(iterations = n, "Starting sideband loop");

    stream::unfold(
        (0usize, provider, false),
        move |(done, mut provider, failed)| async move {
            if failed || done == n {
                return None;
            }
            let iteration = received.load(Ordering::Acquire) + 1;
            let values = provider.values(iteration);
            let result = iterate(transport, layout, received, values).await;
            if let Err(e) = &result {
                warn!(iteration, error = %e, "Sideband loop aborted");
            }
            let failed = result.is_err();
            Some((result, (done + 1, provider, failed)))
        },
    )
    .boxed()
}
