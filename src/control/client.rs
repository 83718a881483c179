//! JSON-RPC control channel over TCP.
//!
//! The connection is opened lazily on the first call and reused. Calls are
//! serialized on one connection; each is bounded by the configured control
//! timeout. Any I/O failure drops the connection so the next call reconnects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::channel::{ControlChannel, OperationShape, ResourceId};
use super::messages::{
    build_request, method, BeginSidebandStreamRequest, BeginSidebandStreamResponse, RpcResponse,
};
use super::status::{ControlResult, RemoteStatus, StatusCode};
use crate::config::SidebandConfig;
use crate::moniker::Moniker;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// [`ControlChannel`] speaking line-delimited JSON-RPC 2.0 over TCP.
pub struct JsonRpcControl {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl JsonRpcControl {
    /// Create a client for `addr` (`host:port`). Nothing is connected yet.
    pub fn new(addr: impl Into<String>, config: &SidebandConfig) -> Self {
        Self {
            addr: addr.into(),
            timeout: config.control_timeout(),
            conn: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> ControlResult<T> {
        match tokio::time::timeout(self.timeout, self.call_inner(method, params)).await {
            Ok(result) => result,
            Err(_) => {
                // The reply may still arrive later; the connection is out of step.
                *self.conn.lock().await = None;
                warn!(method, timeout = ?self.timeout, "Control call timed out");
                Err(RemoteStatus::new(
                    StatusCode::DeadlineExceeded,
                    format!("{} timed out after {:?}", method, self.timeout),
                ))
            }
        }
    }

    async fn call_inner<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> ControlResult<T> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(RemoteStatus::unavailable(format!("{}: not connected", self.addr)));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = build_request(id, method, params);
        line.push('\n');
        trace!(method, id, "Control request");

        let written = conn.writer.write_all(line.as_bytes()).await;
        if let Err(e) = written {
            *guard = None;
            return Err(RemoteStatus::unavailable(format!("{}: {}", self.addr, e)));
        }

        let mut reply = String::new();
        let read = conn.reader.read_line(&mut reply).await;
        match read {
            Ok(0) => {
                *guard = None;
                return Err(RemoteStatus::unavailable(format!(
                    "{}: connection closed by server",
                    self.addr
                )));
            }
            Ok(_) => {}
            Err(e) => {
                *guard = None;
                return Err(RemoteStatus::unavailable(format!("{}: {}", self.addr, e)));
            }
        }
        drop(guard);

        let response: RpcResponse = serde_json::from_str(&reply).map_err(|e| {
            RemoteStatus::new(StatusCode::Internal, format!("Malformed response: {}", e))
        })?;

        if response.id != id {
            return Err(RemoteStatus::new(
                StatusCode::Internal,
                format!("Response id {} does not match request id {}", response.id, id),
            ));
        }

        if let Some(error) = response.error {
            let status = RemoteStatus::from(error);
            debug!(method, id, code = %status.code, "Control call failed");
            return Err(status);
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null)).map_err(|e| {
            RemoteStatus::new(
                StatusCode::Internal,
                format!("Malformed {} result: {}", method, e),
            )
        })
    }

    async fn connect(&self) -> ControlResult<Connection> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| RemoteStatus::unavailable(format!("{}: {}", self.addr, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY on control connection");
        }
        debug!(addr = %self.addr, "Control channel connected");

        let (read, write) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(read),
            writer: write,
        })
    }
}

#[async_trait]
impl ControlChannel for JsonRpcControl {
    async fn create(&self, resource_name: &str) -> ControlResult<ResourceId> {
        self.call(method::CREATE, json!({ "name": resource_name }))
            .await
    }

    async fn start(&self, resource: &ResourceId) -> ControlResult<()> {
        self.call(method::START, json!({ "resource": resource }))
            .await
    }

    async fn stop(&self, resource: &ResourceId) -> ControlResult<()> {
        self.call(method::STOP, json!({ "resource": resource })).await
    }

    async fn clear(&self, resource: &ResourceId) -> ControlResult<()> {
        self.call(method::CLEAR, json!({ "resource": resource }))
            .await
    }

    async fn begin_read(
        &self,
        resource: &ResourceId,
        shape: &OperationShape,
    ) -> ControlResult<Moniker> {
        self.call(
            method::BEGIN_READ,
            json!({ "resource": resource, "shape": shape }),
        )
        .await
    }

    async fn begin_write(
        &self,
        resource: &ResourceId,
        shape: &OperationShape,
    ) -> ControlResult<Moniker> {
        self.call(
            method::BEGIN_WRITE,
            json!({ "resource": resource, "shape": shape }),
        )
        .await
    }

    async fn begin_sideband_stream(
        &self,
        request: BeginSidebandStreamRequest,
    ) -> ControlResult<BeginSidebandStreamResponse> {
        let params = serde_json::to_value(&request).map_err(|e| {
            RemoteStatus::new(StatusCode::Internal, format!("Encode request: {}", e))
        })?;
        self.call(method::BEGIN_SIDEBAND_STREAM, params).await
    }
}
