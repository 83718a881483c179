//! Control plane - the primary request/response channel of the remote service.
//!
//! The sideband engine only depends on [`ControlChannel`]. [`JsonRpcControl`]
//! is the bundled implementation: JSON-RPC 2.0, one object per line, over TCP.
//!
//! # Workflow
//!
//! 1. `create` + `start` the read and write resources
//! 2. `begin_read` / `begin_write` yield monikers
//! 3. `begin_sideband_stream` exchanges the monikers for a session token
//! 4. After the stream is closed, `stop` + `clear` each resource

mod channel;
mod client;
mod messages;
mod status;

pub use channel::{
    begin_read, begin_write, create_and_start, ControlChannel, FillMode, OperationShape,
    ResourceId,
};
pub use client::JsonRpcControl;
pub use messages::{
    build_error_response, build_request, build_response, method, BeginSidebandStreamRequest,
    BeginSidebandStreamResponse, MonikerList, RpcError, RpcErrorData, RpcRequest, RpcResponse,
    JSONRPC_VERSION,
};
pub use status::{ControlResult, RemoteStatus, StatusCode, VENDOR_ERROR_KEY};
