//! The control-channel boundary.
//!
//! [`ControlChannel`] is everything the sideband engine needs from the
//! primary request/response interface of an instrument service: device
//! lifecycle, moniker registration and sideband negotiation. Device-specific
//! configuration (channels, ranges, timing) stays behind `create`.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::messages::{BeginSidebandStreamRequest, BeginSidebandStreamResponse};
use super::status::ControlResult;
use crate::error::{Result, SidebandError};
use crate::moniker::{DataShape, Moniker};

/// Handle of a device resource (task or FPGA session) on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sample ordering of a multi-channel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillMode {
    #[default]
    GroupByChannel,
    GroupByScanNumber,
}

/// Parameters of a begin-read or begin-write call.
///
/// Only `data` matters to the sideband engine; the rest is passed through to
/// the service untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationShape {
    pub data: DataShape,
    pub samples_per_channel: u32,
    pub timeout_secs: f64,
    pub layout: FillMode,
}

impl OperationShape {
    /// One sample per channel, 10 s timeout, grouped by channel.
    pub fn new(data: DataShape) -> Self {
        Self {
            data,
            samples_per_channel: 1,
            timeout_secs: 10.0,
            layout: FillMode::GroupByChannel,
        }
    }

    pub fn samples_per_channel(mut self, samples: u32) -> Self {
        self.samples_per_channel = samples;
        self
    }

    pub fn timeout_secs(mut self, timeout: f64) -> Self {
        self.timeout_secs = timeout;
        self
    }

    pub fn layout(mut self, layout: FillMode) -> Self {
        self.layout = layout;
        self
    }
}

/// Request/response interface of a remote instrument service.
///
/// Every call resolves to a value or a [`RemoteStatus`](super::RemoteStatus);
/// implementations never panic on a remote fault.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Create a named device resource.
    async fn create(&self, resource_name: &str) -> ControlResult<ResourceId>;

    async fn start(&self, resource: &ResourceId) -> ControlResult<()>;

    async fn stop(&self, resource: &ResourceId) -> ControlResult<()>;

    /// Release the resource. The id is invalid afterwards.
    async fn clear(&self, resource: &ResourceId) -> ControlResult<()>;

    /// Register a pending read, returning its moniker.
    async fn begin_read(&self, resource: &ResourceId, shape: &OperationShape)
        -> ControlResult<Moniker>;

    /// Register a pending write, returning its moniker.
    async fn begin_write(
        &self,
        resource: &ResourceId,
        shape: &OperationShape,
    ) -> ControlResult<Moniker>;

    /// Negotiate a sideband stream for a moniker set.
    async fn begin_sideband_stream(
        &self,
        request: BeginSidebandStreamRequest,
    ) -> ControlResult<BeginSidebandStreamResponse>;
}

/// Create a resource and start it, as every streaming program does first.
pub async fn create_and_start(control: &dyn ControlChannel, name: &str) -> Result<ResourceId> {
    let resource = control
        .create(name)
        .await
        .map_err(SidebandError::RemoteOperation)?;
    control
        .start(&resource)
        .await
        .map_err(SidebandError::RemoteOperation)?;
    debug!(resource = %resource, name, "Resource started");
    Ok(resource)
}

/// Register a pending read.
pub async fn begin_read(
    control: &dyn ControlChannel,
    resource: &ResourceId,
    shape: &OperationShape,
) -> Result<Moniker> {
    let moniker = control
        .begin_read(resource, shape)
        .await
        .map_err(SidebandError::RemoteOperation)?;
    debug!(resource = %resource, moniker = %moniker, shape = %moniker.shape(), "Read registered");
    Ok(moniker)
}

/// Register a pending write.
pub async fn begin_write(
    control: &dyn ControlChannel,
    resource: &ResourceId,
    shape: &OperationShape,
) -> Result<Moniker> {
    let moniker = control
        .begin_write(resource, shape)
        .await
        .map_err(SidebandError::RemoteOperation)?;
    debug!(resource = %resource, moniker = %moniker, shape = %moniker.shape(), "Write registered");
    Ok(moniker)
}
