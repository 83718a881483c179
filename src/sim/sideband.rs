//! Sideband endpoint of the simulated instrument.

use std::time::Instant;

use tracing::{debug, trace, warn};

use super::{echo, SessionPlan, Shared};
use crate::codec::{MsgPackCodec, SidebandValues};
use crate::config::SidebandConfig;
use crate::error::{Result, SidebandError};
use crate::protocol::kind;
use crate::transport::{
    write_frames, BoxedReader, BoxedWriter, FrameReader, OutboundFrame, SidebandListener,
};

pub(super) async fn serve(listener: SidebandListener, shared: Shared) {
    loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((read, write)) => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let shutdown = shared.shutdown.clone();
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        result = connection(read, write, shared) => {
                            if let Err(e) = result {
                                debug!(error = %e, "Sideband connection ended with error");
                            }
                        }
                    }
                });
            }
            Err(e) => warn!(error = %e, "Sideband accept failed"),
        }
    }
}

async fn connection(read: BoxedReader, mut write: BoxedWriter, shared: Shared) -> Result<()> {
    let mut frames = FrameReader::new(read, &SidebandConfig::default());

    let hello = frames.next_frame().await?;
    if hello.kind() != kind::HELLO {
        return reject(&mut write, "expected HELLO").await;
    }
    let token = String::from_utf8_lossy(hello.payload()).into_owned();
    let plan = shared.state().claim_session(&token, Instant::now());
    let Some(plan) = plan else {
        return reject(&mut write, "unknown session token").await;
    };
    write_frames(&mut write, &[OutboundFrame::empty(kind::READY, 0)]).await?;
    debug!(reads = plan.read.len(), writes = plan.write.len(), "Sideband session connected");

    let mut cancelled = false;
    loop {
        let frame = match frames.next_frame().await {
            Ok(frame) => frame,
            Err(SidebandError::TransportClosed) => break,
            Err(e) => return Err(e),
        };

        match frame.kind() {
            kind::WRITE if !cancelled => {
                let batch: SidebandValues = MsgPackCodec::decode(frame.payload())?;
                record(&shared, &plan, &batch);
                trace!(sequence = frame.sequence(), "Write batch received");

                if shared.stall_reads {
                    continue;
                }
                let reply = SidebandValues::new(echo(&plan, &batch.values));
                let body = MsgPackCodec::encode(&reply)?;
                write_frames(
                    &mut write,
                    &[OutboundFrame::with_payload(kind::READ, frame.sequence(), body)],
                )
                .await?;
            }
            kind::CANCEL => {
                if !cancelled {
                    shared.state().cancels += 1;
                    cancelled = true;
                    debug!("Sideband cancel observed");
                }
            }
            other => {
                let message = format!("unexpected {} frame", kind::name(other));
                return reject(&mut write, &message).await;
            }
        }
    }

    debug!("Sideband session disconnected");
    Ok(())
}

fn record(shared: &Shared, plan: &SessionPlan, batch: &SidebandValues) {
    let mut state = shared.state();
    for (instance, payload) in plan.write.iter().zip(&batch.values) {
        state
            .writes
            .entry(*instance)
            .or_default()
            .push(payload.clone());
    }
}

async fn reject(write: &mut BoxedWriter, message: &str) -> Result<()> {
    warn!(reason = message, "Rejecting sideband connection");
    let body = MsgPackCodec::encode(&message)?;
    write_frames(write, &[OutboundFrame::with_payload(kind::ERROR, 0, body)]).await
}
