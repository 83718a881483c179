//! Sideband negotiation.
//!
//! One control-channel round trip exchanges a [`MonikerGroup`] and a
//! [`Strategy`] for a [`SessionToken`] and the parameters needed to open the
//! data channel. The group is consumed: its monikers are bound to the session
//! and cannot be handed to another negotiation.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::control::{BeginSidebandStreamRequest, ControlChannel, MonikerList};
use crate::error::{Result, SidebandError};
use crate::moniker::{MonikerGroup, SlotLayout};

/// Transport policy of a sideband session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Plain stream sockets.
    Sockets,
    /// Stream sockets with Nagle's algorithm disabled.
    SocketsLowLatency,
}

impl Strategy {
    /// Whether the data socket sets `TCP_NODELAY`.
    #[inline]
    pub fn nodelay(self) -> bool {
        matches!(self, Strategy::SocketsLowLatency)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Sockets => "SOCKETS",
            Strategy::SocketsLowLatency => "SOCKETS_LOW_LATENCY",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability identifying one negotiated session.
///
/// `Debug` and `Display` never print the value; use [`fingerprint`](Self::fingerprint)
/// to correlate log lines.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// A fresh random token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The raw token, for the transport handshake only.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short non-reversible tag for logs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.0.hash(&mut hasher);
        format!("{:08x}", hasher.finish() as u32)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({})", self.fingerprint())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<token {}>", self.fingerprint())
    }
}

/// Everything needed to open the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    /// `host:port` or `unix:/path`.
    pub connection_url: String,
    pub strategy: Strategy,
    /// Buffer size hint from the remote.
    pub buffer_size: u64,
}

/// Result of a successful negotiation.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub token: SessionToken,
    pub params: TransportParams,
    /// Slot shapes fixed by the negotiated moniker order.
    pub layout: SlotLayout,
}

/// Exchange `group` for a session token.
///
/// An empty group is accepted; the resulting session moves no data.
///
/// # Errors
///
/// [`SidebandError::Negotiation`] carrying the remote status when the remote
/// rejects the request or cannot be reached; [`SidebandError::Protocol`] when
/// the response is unusable.
pub async fn negotiate(
    control: &dyn ControlChannel,
    group: MonikerGroup,
    strategy: Strategy,
) -> Result<Negotiated> {
    if group.is_empty() {
        warn!("Negotiating a sideband session with no monikers");
    }

    let layout = group.layout();
    let (read_monikers, write_monikers) = group.into_parts();
    let request = BeginSidebandStreamRequest {
        strategy,
        monikers: MonikerList {
            read_monikers,
            write_monikers,
        },
    };

    let response = control
        .begin_sideband_stream(request)
        .await
        .map_err(|status| {
            warn!(strategy = %strategy, code = %status.code, "Sideband negotiation rejected");
            SidebandError::Negotiation(status)
        })?;

    if response.sideband_identifier.is_empty() {
        return Err(SidebandError::Protocol(
            "Negotiation returned an empty session token".to_string(),
        ));
    }
    if response.strategy != strategy {
        return Err(SidebandError::Protocol(format!(
            "Requested strategy {} but remote granted {}",
            strategy, response.strategy
        )));
    }

    let token = SessionToken::new(response.sideband_identifier);
    info!(
        token = %token.fingerprint(),
        strategy = %strategy,
        url = %response.connection_url,
        reads = layout.read_len(),
        writes = layout.write_len(),
        "Sideband negotiated"
    );

    Ok(Negotiated {
        token,
        params: TransportParams {
            connection_url: response.connection_url,
            strategy,
            buffer_size: response.buffer_size,
        },
        layout,
    })
}
