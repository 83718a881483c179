//! JSON-RPC 2.0 messages of the control channel.
//!
//! One JSON object per line. Failures are JSON-RPC error objects whose `code`
//! is the numeric [`StatusCode`] and whose `data.metadata` carries the
//! diagnostic key/value pairs as `[key, value]` arrays.
//!
//! # Example
//!
//! ```
//! use moniker_sideband::control::{build_request, method};
//! use serde_json::json;
//!
//! let line = build_request(7, method::START, json!({ "resource": "task-1" }));
//! assert!(line.contains("\"jsonrpc\":\"2.0\""));
//! assert!(line.contains("\"id\":7"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::status::{RemoteStatus, StatusCode};
use crate::moniker::Moniker;
use crate::negotiate::Strategy;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names.
pub mod method {
    pub const CREATE: &str = "Create";
    pub const START: &str = "Start";
    pub const STOP: &str = "Stop";
    pub const CLEAR: &str = "Clear";
    pub const BEGIN_READ: &str = "BeginRead";
    pub const BEGIN_WRITE: &str = "BeginWrite";
    pub const BEGIN_SIDEBAND_STREAM: &str = "BeginSidebandStream";
}

/// Read and write monikers of one negotiation, in slot order.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MonikerList {
    #[serde(default)]
    pub read_monikers: Vec<Moniker>,
    #[serde(default)]
    pub write_monikers: Vec<Moniker>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct BeginSidebandStreamRequest {
    pub strategy: Strategy,
    pub monikers: MonikerList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginSidebandStreamResponse {
    pub strategy: Strategy,
    /// Session token. Capability-bearing; never log it.
    pub sideband_identifier: String,
    pub connection_url: String,
    pub buffer_size: u64,
}

/// A request as read by a server.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A response as read by a client.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RpcErrorData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcErrorData {
    #[serde(default)]
    pub metadata: Vec<(String, String)>,
}

impl From<RpcError> for RemoteStatus {
    fn from(error: RpcError) -> Self {
        RemoteStatus {
            code: StatusCode::from_code(error.code),
            message: error.message,
            metadata: error.data.map(|d| d.metadata).unwrap_or_default(),
        }
    }
}

impl From<&RemoteStatus> for RpcError {
    fn from(status: &RemoteStatus) -> Self {
        RpcError {
            code: status.code.code(),
            message: status.message.clone(),
            data: (!status.metadata.is_empty()).then(|| RpcErrorData {
                metadata: status.metadata.clone(),
            }),
        }
    }
}

/// Build a request line (without the trailing newline).
pub fn build_request(id: u64, method: &str, params: Value) -> String {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params
    })
    .to_string()
}

/// Build a success response line.
pub fn build_response(id: u64, result: Value) -> String {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result
    })
    .to_string()
}

/// Build an error response line carrying `status`.
pub fn build_error_response(id: u64, status: &RemoteStatus) -> String {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": RpcError::from(status)
    })
    .to_string()
}
