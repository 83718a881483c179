//! JSON-RPC control server of the simulated instrument.

use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use super::{PendingMoniker, Resource, SessionPlan, Shared, INVALID_DEVICE_ERROR, SIM_BUFFER_SIZE};
use crate::control::{
    build_error_response, build_response, method, BeginSidebandStreamRequest,
    BeginSidebandStreamResponse, ControlResult, OperationShape, RemoteStatus, ResourceId,
    RpcRequest, StatusCode, VENDOR_ERROR_KEY,
};
use crate::error::Direction;
use crate::moniker::Moniker;
use crate::negotiate::SessionToken;

#[derive(Deserialize)]
struct CreateParams {
    name: String,
}

#[derive(Deserialize)]
struct ResourceParams {
    resource: ResourceId,
}

#[derive(Deserialize)]
struct BeginParams {
    resource: ResourceId,
    shape: OperationShape,
}

pub(super) async fn serve(listener: TcpListener, shared: Shared) {
    loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "Control connection accepted");
                tokio::spawn(connection(stream, shared.clone()));
            }
            Err(e) => warn!(error = %e, "Control accept failed"),
        }
    }
}

async fn connection(stream: TcpStream, shared: Shared) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    loop {
        let line = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Control connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let mut reply = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => {
                let outcome = dispatch(&shared, &request.method, request.params);
                match outcome {
                    Ok(result) => build_response(request.id, result),
                    Err(status) => {
                        debug!(method = %request.method, code = %status.code, "Control call rejected");
                        build_error_response(request.id, &status)
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Malformed control request");
                break;
            }
        };
        reply.push('\n');

        if write.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

fn params<T: DeserializeOwned>(params: Value) -> ControlResult<T> {
    serde_json::from_value(params)
        .map_err(|e| RemoteStatus::new(StatusCode::InvalidArgument, format!("Bad params: {}", e)))
}

fn dispatch(shared: &Shared, name: &str, raw: Value) -> ControlResult<Value> {
    match name {
        method::CREATE => {
            let p: CreateParams = params(raw)?;
            create(shared, &p.name).map(|id| json!(id))
        }
        method::START => {
            let p: ResourceParams = params(raw)?;
            with_resource(shared, &p.resource, |r| r.started = true).map(|_| Value::Null)
        }
        method::STOP => {
            let p: ResourceParams = params(raw)?;
            with_resource(shared, &p.resource, |r| r.started = false).map(|_| Value::Null)
        }
        method::CLEAR => {
            let p: ResourceParams = params(raw)?;
            let mut state = shared.state();
            state
                .resources
                .remove(p.resource.as_str())
                .map(|_| Value::Null)
                .ok_or_else(|| not_found(&p.resource))
        }
        method::BEGIN_READ => {
            let p: BeginParams = params(raw)?;
            begin(shared, &p.resource, &p.shape, Direction::Read).and_then(to_value)
        }
        method::BEGIN_WRITE => {
            let p: BeginParams = params(raw)?;
            begin(shared, &p.resource, &p.shape, Direction::Write).and_then(to_value)
        }
        method::BEGIN_SIDEBAND_STREAM => {
            let request: BeginSidebandStreamRequest = params(raw)?;
            begin_sideband_stream(shared, request).and_then(to_value)
        }
        other => Err(RemoteStatus::unimplemented(format!(
            "Method '{}' is not implemented by this service",
            other
        ))),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> ControlResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| RemoteStatus::new(StatusCode::Internal, e.to_string()))
}

fn not_found(resource: &ResourceId) -> RemoteStatus {
    RemoteStatus::new(
        StatusCode::NotFound,
        format!("Resource '{}' does not exist", resource),
    )
}

fn create(shared: &Shared, name: &str) -> ControlResult<ResourceId> {
    let mut state = shared.state();
    if !state.known_devices.is_empty() && !state.known_devices.iter().any(|d| d == name) {
        return Err(RemoteStatus::new(
            StatusCode::NotFound,
            format!("Device identifier '{}' is invalid", name),
        )
        .with_metadata(VENDOR_ERROR_KEY, INVALID_DEVICE_ERROR));
    }

    state.next_resource += 1;
    let id = format!("{}-{}", name, state.next_resource);
    state.resources.insert(
        id.clone(),
        Resource {
            name: name.to_string(),
            started: false,
        },
    );
    Ok(ResourceId::new(id))
}

fn with_resource(
    shared: &Shared,
    resource: &ResourceId,
    f: impl FnOnce(&mut Resource),
) -> ControlResult<()> {
    let mut state = shared.state();
    let entry = state
        .resources
        .get_mut(resource.as_str())
        .ok_or_else(|| not_found(resource))?;
    f(entry);
    Ok(())
}

fn begin(
    shared: &Shared,
    resource: &ResourceId,
    shape: &OperationShape,
    direction: Direction,
) -> ControlResult<Moniker> {
    let mut state = shared.state();
    let started = state
        .resources
        .get(resource.as_str())
        .ok_or_else(|| not_found(resource))?
        .started;
    if !started {
        return Err(RemoteStatus::new(
            StatusCode::FailedPrecondition,
            format!("Resource '{}' is not started", resource),
        ));
    }

    state.next_instance += 1;
    let instance = state.next_instance;
    state.monikers.insert(
        instance,
        PendingMoniker {
            direction,
            shape: shape.data,
        },
    );
    Ok(Moniker::from_remote(
        shared.control_addr.clone(),
        instance,
        shape.data,
    ))
}

fn begin_sideband_stream(
    shared: &Shared,
    request: BeginSidebandStreamRequest,
) -> ControlResult<BeginSidebandStreamResponse> {
    let mut state = shared.state();
    if !state.strategies.contains(&request.strategy) {
        return Err(RemoteStatus::unimplemented(format!(
            "Sideband strategy {} is not supported by this service",
            request.strategy
        )));
    }

    let sets = [
        (Direction::Read, &request.monikers.read_monikers),
        (Direction::Write, &request.monikers.write_monikers),
    ];
    for (direction, monikers) in sets {
        for moniker in monikers.iter() {
            let valid = state
                .monikers
                .get(&moniker.data_instance())
                .is_some_and(|p| p.direction == direction && p.shape == moniker.shape());
            if !valid {
                return Err(RemoteStatus::new(
                    StatusCode::InvalidArgument,
                    format!("Unknown or already consumed {} moniker {}", direction, moniker),
                ));
            }
        }
    }

    let mut plan = SessionPlan::default();
    for moniker in &request.monikers.read_monikers {
        state.monikers.remove(&moniker.data_instance());
        plan.read.push(moniker.shape());
    }
    for moniker in &request.monikers.write_monikers {
        state.monikers.remove(&moniker.data_instance());
        plan.write.push(moniker.data_instance());
    }

    let token = SessionToken::generate();
    debug!(
        token = %token.fingerprint(),
        reads = plan.read.len(),
        writes = plan.write.len(),
        "Sideband session negotiated"
    );
    state.offer_session(token.as_str().to_string(), plan, Instant::now());

    Ok(BeginSidebandStreamResponse {
        strategy: request.strategy,
        sideband_identifier: token.as_str().to_string(),
        connection_url: shared.sideband_url.clone(),
        buffer_size: SIM_BUFFER_SIZE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SidebandConfig;
    use crate::control::{ControlChannel, JsonRpcControl};
    use crate::moniker::{DataShape, ElementType};
    use crate::negotiate::Strategy;
    use crate::sim::SimulatedInstrument;

    #[tokio::test]
    async fn test_unknown_device_carries_vendor_error() {
        let sim = SimulatedInstrument::builder()
            .resource("Dev1")
            .start()
            .await
            .unwrap();
        let control = JsonRpcControl::new(sim.control_addr(), &SidebandConfig::default());

        let status = control.create("Dev9").await.unwrap_err();
        assert_eq!(status.code, StatusCode::NotFound);
        assert_eq!(status.vendor_error(), Some(INVALID_DEVICE_ERROR));
    }

    #[tokio::test]
    async fn test_begin_requires_started_resource() {
        let sim = SimulatedInstrument::builder().start().await.unwrap();
        let control = JsonRpcControl::new(sim.control_addr(), &SidebandConfig::default());

        let resource = control.create("Dev1").await.unwrap();
        let shape = OperationShape::new(DataShape::scalar(ElementType::F64));
        let status = control.begin_read(&resource, &shape).await.unwrap_err();
        assert_eq!(status.code, StatusCode::FailedPrecondition);

        control.start(&resource).await.unwrap();
        let moniker = control.begin_read(&resource, &shape).await.unwrap();
        assert_eq!(moniker.service_location(), sim.control_addr());
        assert_eq!(moniker.shape(), shape.data);
    }

    #[tokio::test]
    async fn test_monikers_are_consumed_by_negotiation() {
        let sim = SimulatedInstrument::builder().start().await.unwrap();
        let control = JsonRpcControl::new(sim.control_addr(), &SidebandConfig::default());

        let resource = control.create("Dev1").await.unwrap();
        control.start(&resource).await.unwrap();
        let shape = OperationShape::new(DataShape::scalar(ElementType::F64));
        let moniker = control.begin_read(&resource, &shape).await.unwrap();
        let replay = Moniker::from_remote(
            moniker.service_location(),
            moniker.data_instance(),
            moniker.shape(),
        );

        let request = |m: Moniker| BeginSidebandStreamRequest {
            strategy: Strategy::Sockets,
            monikers: crate::control::MonikerList {
                read_monikers: vec![m],
                write_monikers: vec![],
            },
        };

        let response = control
            .begin_sideband_stream(request(moniker))
            .await
            .unwrap();
        assert_eq!(response.connection_url, sim.sideband_url());
        assert_eq!(response.buffer_size, SIM_BUFFER_SIZE);

        let status = control
            .begin_sideband_stream(request(replay))
            .await
            .unwrap_err();
        assert_eq!(status.code, StatusCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_clear_removes_resource() {
        let sim = SimulatedInstrument::builder().start().await.unwrap();
        let control = JsonRpcControl::new(sim.control_addr(), &SidebandConfig::default());

        let resource = control.create("Dev1").await.unwrap();
        assert_eq!(sim.live_resources(), vec!["Dev1".to_string()]);

        control.clear(&resource).await.unwrap();
        assert!(sim.live_resources().is_empty());
        assert_eq!(
            control.stop(&resource).await.unwrap_err().code,
            StatusCode::NotFound
        );
    }
}
