//! In-process simulated instrument service.
//!
//! A JSON-RPC control server plus a sideband endpoint that behaves like a
//! loopback device: every read slot echoes the write slot at the same
//! position, cast to the read element type and truncated or zero-padded to
//! the read length. Writes are recorded per moniker so tests can observe
//! which moniker each slot was bound to.
//!
//! # Example
//!
//! ```ignore
//! let sim = SimulatedInstrument::builder().resource("Dev1").start().await?;
//! let control = JsonRpcControl::new(sim.control_addr(), &config);
//! ```

mod control;
mod sideband;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::TypedPayload;
use crate::error::{Direction, Result};
use crate::moniker::DataShape;
use crate::negotiate::Strategy;
use crate::transport::{generate_socket_path, Endpoint, SidebandListener};

/// Buffer size reported by negotiation.
pub const SIM_BUFFER_SIZE: u64 = 64 * 1024;

/// Vendor error code for an unknown device name.
pub const INVALID_DEVICE_ERROR: &str = "-200220";

/// How long a negotiated session waits for its sideband connection.
pub const UNOPENED_SESSION_TTL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Resource {
    name: String,
    started: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingMoniker {
    direction: Direction,
    shape: DataShape,
}

/// Slot plan of one negotiated, not yet connected session.
#[derive(Debug, Clone, Default)]
struct SessionPlan {
    read: Vec<DataShape>,
    write: Vec<u64>,
}

#[derive(Debug)]
struct PendingSession {
    plan: SessionPlan,
    negotiated: Instant,
}

#[derive(Debug, Default)]
struct SimState {
    known_devices: Vec<String>,
    strategies: Vec<Strategy>,
    resources: HashMap<String, Resource>,
    next_resource: u64,
    monikers: HashMap<u64, PendingMoniker>,
    next_instance: u64,
    sessions: HashMap<String, PendingSession>,
    writes: HashMap<u64, Vec<TypedPayload>>,
    cancels: usize,
}

impl SimState {
    /// Forget negotiated sessions nobody connected to in time.
    fn prune_unopened(&mut self, now: Instant) {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, pending| now.duration_since(pending.negotiated) < UNOPENED_SESSION_TTL);
        let expired = before - self.sessions.len();
        if expired > 0 {
            debug!(expired, "Dropped unopened sideband sessions");
        }
    }

    /// Take the plan for `token`, unless it expired.
    fn claim_session(&mut self, token: &str, now: Instant) -> Option<SessionPlan> {
        self.prune_unopened(now);
        self.sessions.remove(token).map(|pending| pending.plan)
    }

    fn offer_session(&mut self, token: String, plan: SessionPlan, now: Instant) {
        self.prune_unopened(now);
        self.sessions.insert(
            token,
            PendingSession {
                plan,
                negotiated: now,
            },
        );
    }
}

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<SimState>>,
    shutdown: CancellationToken,
    control_addr: String,
    sideband_url: String,
    stall_reads: bool,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Builder for [`SimulatedInstrument`].
#[derive(Debug, Clone)]
pub struct SimulatedInstrumentBuilder {
    devices: Vec<String>,
    strategies: Vec<Strategy>,
    stall_reads: bool,
    unix_sideband: bool,
}

impl SimulatedInstrumentBuilder {
    fn new() -> Self {
        Self {
            devices: Vec::new(),
            strategies: vec![Strategy::Sockets, Strategy::SocketsLowLatency],
            stall_reads: false,
            unix_sideband: false,
        }
    }

    /// Accept `name` in `create`. With no names configured any name is accepted.
    pub fn resource(mut self, name: impl Into<String>) -> Self {
        self.devices.push(name.into());
        self
    }

    /// Strategies this build supports. Others are rejected as unimplemented.
    pub fn strategies(mut self, strategies: &[Strategy]) -> Self {
        self.strategies = strategies.to_vec();
        self
    }

    /// Never answer write batches.
    pub fn stall_reads(mut self, stall: bool) -> Self {
        self.stall_reads = stall;
        self
    }

    /// Serve the sideband on a Unix domain socket instead of TCP.
    pub fn unix_sideband(mut self, unix: bool) -> Self {
        self.unix_sideband = unix;
        self
    }

    /// Bind both endpoints on loopback and start serving.
    pub async fn start(self) -> Result<SimulatedInstrument> {
        let control = TcpListener::bind("127.0.0.1:0").await?;
        let control_addr = control.local_addr()?.to_string();

        let endpoint = if self.unix_sideband {
            Endpoint::Unix(generate_socket_path())
        } else {
            Endpoint::Tcp("127.0.0.1:0".to_string())
        };
        let sideband = SidebandListener::bind(&endpoint).await?;
        let sideband_url = sideband.local_endpoint()?.url();

        let shared = Shared {
            state: Arc::new(Mutex::new(SimState {
                known_devices: self.devices,
                strategies: self.strategies,
                ..SimState::default()
            })),
            shutdown: CancellationToken::new(),
            control_addr: control_addr.clone(),
            sideband_url: sideband_url.clone(),
            stall_reads: self.stall_reads,
        };

        let tasks = vec![
            tokio::spawn(control::serve(control, shared.clone())),
            tokio::spawn(sideband::serve(sideband, shared.clone())),
        ];

        info!(control = %control_addr, sideband = %sideband_url, "Simulated instrument started");

        Ok(SimulatedInstrument { shared, tasks })
    }
}

/// Handle of a running simulated instrument. Stops serving on drop.
pub struct SimulatedInstrument {
    shared: Shared,
    tasks: Vec<JoinHandle<()>>,
}

impl SimulatedInstrument {
    pub fn builder() -> SimulatedInstrumentBuilder {
        SimulatedInstrumentBuilder::new()
    }

    /// `host:port` of the JSON-RPC control server.
    pub fn control_addr(&self) -> &str {
        &self.shared.control_addr
    }

    /// Connection URL handed out by negotiation.
    pub fn sideband_url(&self) -> &str {
        &self.shared.sideband_url
    }

    /// Every payload written to the moniker with `data_instance`, in order.
    pub fn recorded_writes(&self, data_instance: u64) -> Vec<TypedPayload> {
        self.shared
            .state()
            .writes
            .get(&data_instance)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of cancel flags received across all sessions.
    pub fn cancels_observed(&self) -> usize {
        self.shared.state().cancels
    }

    /// Resources created and not yet cleared.
    pub fn live_resources(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .state()
            .resources
            .values()
            .map(|r| r.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Stop serving and wait for the server tasks to finish.
    pub async fn shutdown(mut self) {
        self.shared.shutdown.cancel();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }
}

impl Drop for SimulatedInstrument {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl std::fmt::Debug for SimulatedInstrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedInstrument")
            .field("control_addr", &self.shared.control_addr)
            .field("sideband_url", &self.shared.sideband_url)
            .finish()
    }
}

/// Build the read batch answering `written`.
fn echo(plan: &SessionPlan, written: &[TypedPayload]) -> Vec<TypedPayload> {
    plan.read
        .iter()
        .enumerate()
        .map(|(slot, shape)| {
            let source = written
                .get(slot)
                .map(TypedPayload::to_f64_values)
                .unwrap_or_default();
            let values = source
                .into_iter()
                .chain(std::iter::repeat(0.0))
                .take(shape.len());
            TypedPayload::from_f64_values(shape.element, values)
        })
        .collect()
}
