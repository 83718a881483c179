//! Ordered, best-effort teardown.
//!
//! Cancel, then Close, then Stop + Clear of each device resource. Every step
//! runs even when an earlier one failed, and every outcome is recorded in a
//! [`TeardownReport`].

use tracing::{debug, info, warn};

use crate::control::{ControlChannel, ResourceId};
use crate::error::{Result, SidebandError};
use crate::session::SidebandSession;

/// Stop and clear outcome for one resource.
#[derive(Debug)]
pub struct ResourceStep {
    pub resource: ResourceId,
    pub stop: Result<()>,
    pub clear: Result<()>,
}

/// Outcome of every teardown step, in the order they ran.
#[derive(Debug)]
pub struct TeardownReport {
    pub cancel: Result<()>,
    pub close: Result<()>,
    pub resources: Vec<ResourceStep>,
}

impl TeardownReport {
    /// True if every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Failed steps, labelled, in order.
    pub fn failures(&self) -> impl Iterator<Item = (String, &SidebandError)> + '_ {
        let session = [("cancel", &self.cancel), ("close", &self.close)]
            .into_iter()
            .filter_map(|(step, result)| result.as_ref().err().map(|e| (step.to_string(), e)));

        let resources = self.resources.iter().flat_map(|r| {
            [("stop", &r.stop), ("clear", &r.clear)]
                .into_iter()
                .filter_map(move |(step, result)| {
                    result
                        .as_ref()
                        .err()
                        .map(|e| (format!("{} {}", step, r.resource), e))
                })
        });

        session.chain(resources)
    }

    /// The first failure, if any.
    pub fn into_result(self) -> Result<()> {
        self.cancel?;
        self.close?;
        for step in self.resources {
            step.stop?;
            step.clear?;
        }
        Ok(())
    }
}

/// Tear down `session`, then stop and clear `resources`.
///
/// Cancel is skipped if the session is already closed. A failed close does
/// not prevent the resource steps.
pub async fn teardown(
    session: &SidebandSession,
    control: &dyn ControlChannel,
    resources: &[ResourceId],
) -> TeardownReport {
    let cancel = if session.is_closed() {
        debug!("Session already closed, skipping cancel");
        Ok(())
    } else {
        session.cancel().await
    };
    if let Err(e) = &cancel {
        warn!(error = %e, "Sideband cancel failed");
    }

    let close = session.close().await;
    if let Err(e) = &close {
        warn!(error = %e, "Sideband close failed");
    }

    let mut steps = Vec::with_capacity(resources.len());
    for resource in resources {
        let stop = control
            .stop(resource)
            .await
            .map_err(SidebandError::RemoteOperation);
        if let Err(e) = &stop {
            warn!(%resource, error = %e, "Stop failed");
        }

        let clear = control
            .clear(resource)
            .await
            .map_err(SidebandError::RemoteOperation);
        if let Err(e) = &clear {
            warn!(%resource, error = %e, "Clear failed");
        }

        steps.push(ResourceStep {
            resource: resource.clone(),
            stop,
            clear,
        });
    }

    let report = TeardownReport {
        cancel,
        close,
        resources: steps,
    };
    if report.is_clean() {
        info!(resources = resources.len(), "Teardown complete");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SidebandConfig;
    use crate::control::{
        BeginSidebandStreamRequest, BeginSidebandStreamResponse, ControlResult, OperationShape,
        RemoteStatus,
    };
    use crate::moniker::{Moniker, SlotLayout};
    use crate::negotiate::{SessionToken, Strategy};
    use crate::transport::{BoxedReader, Endpoint, FrameReader, SidebandTransport};
    use async_trait::async_trait;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tokio::io::AsyncWrite;

    /// Accepts every frame, then fails to shut down.
    struct RefusingShutdown;

    impl AsyncWrite for RefusingShutdown {
        fn poll_write(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "shutdown refused")))
        }
    }

    fn session_with_failing_close() -> SidebandSession {
        let config = SidebandConfig::default();
        let reader: BoxedReader = Box::new(tokio::io::empty());
        let transport = SidebandTransport::from_halves(
            SessionToken::new("tok"),
            Endpoint::Tcp("127.0.0.1:1".into()),
            FrameReader::new(reader, &config),
            Box::new(RefusingShutdown),
            &config,
        );
        SidebandSession::from_transport(transport, SlotLayout::new(vec![], vec![]), Strategy::Sockets)
    }

    /// Records stop and clear calls in order.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn record(&self, call: &str, resource: &ResourceId) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(format!("{call} {resource}"));
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ControlChannel for Recorder {
        async fn create(&self, _: &str) -> ControlResult<ResourceId> {
            Err(RemoteStatus::unimplemented("create"))
        }
        async fn start(&self, _: &ResourceId) -> ControlResult<()> {
            Ok(())
        }
        async fn stop(&self, resource: &ResourceId) -> ControlResult<()> {
            self.record("stop", resource);
            Ok(())
        }
        async fn clear(&self, resource: &ResourceId) -> ControlResult<()> {
            self.record("clear", resource);
            Ok(())
        }
        async fn begin_read(&self, _: &ResourceId, _: &OperationShape) -> ControlResult<Moniker> {
            Err(RemoteStatus::unimplemented("begin_read"))
        }
        async fn begin_write(&self, _: &ResourceId, _: &OperationShape) -> ControlResult<Moniker> {
            Err(RemoteStatus::unimplemented("begin_write"))
        }
        async fn begin_sideband_stream(
            &self,
            _: BeginSidebandStreamRequest,
        ) -> ControlResult<BeginSidebandStreamResponse> {
            Err(RemoteStatus::unimplemented("begin_sideband_stream"))
        }
    }

    #[tokio::test]
    async fn test_failed_close_still_releases_resources() {
        let session = session_with_failing_close();
        let control = Recorder::default();
        let resources = [ResourceId::new("in"), ResourceId::new("out")];

        let report = teardown(&session, &control, &resources).await;

        assert!(report.cancel.is_ok());
        assert!(matches!(report.close, Err(SidebandError::Io(_))));
        assert!(session.is_closed());
        assert_eq!(
            control.calls(),
            vec!["stop in", "clear in", "stop out", "clear out"]
        );

        let labels: Vec<String> = report.failures().map(|(step, _)| step).collect();
        assert_eq!(labels, vec!["close"]);
        match report.into_result() {
            Err(SidebandError::Io(e)) => assert!(e.to_string().contains("shutdown refused")),
            other => panic!("expected the close failure, got {other:?}"),
        }
    }

    fn failed(msg: &str) -> Result<()> {
        Err(SidebandError::RemoteOperation(RemoteStatus::unavailable(msg)))
    }

    #[test]
    fn test_clean_report() {
        let report = TeardownReport {
            cancel: Ok(()),
            close: Ok(()),
            resources: vec![ResourceStep {
                resource: ResourceId::new("Dev1"),
                stop: Ok(()),
                clear: Ok(()),
            }],
        };
        assert!(report.is_clean());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_failures_are_labelled_in_order() {
        let report = TeardownReport {
            cancel: Ok(()),
            close: Err(SidebandError::TransportClosed),
            resources: vec![
                ResourceStep {
                    resource: ResourceId::new("in"),
                    stop: Ok(()),
                    clear: failed("gone"),
                },
                ResourceStep {
                    resource: ResourceId::new("out"),
                    stop: failed("gone"),
                    clear: Ok(()),
                },
            ],
        };

        let labels: Vec<String> = report.failures().map(|(step, _)| step).collect();
        assert_eq!(labels, vec!["close", "clear in", "stop out"]);

        let first = report.into_result().unwrap_err();
        assert!(matches!(first, SidebandError::TransportClosed));
    }
}
