//! # moniker-sideband
//!
//! Low-latency data streaming to and from remote instrument services.
//!
//! A client registers pending read and write operations on a remote service
//! and receives a [`Moniker`] for each. It then trades the whole set for a
//! session token over the control channel, opens a secondary data connection
//! with that token and exchanges positional payload batches on it.
//!
//! ## Architecture
//!
//! - **Control Plane** ([`control`]): JSON-RPC request/response for device
//!   lifecycle, moniker registration and sideband negotiation
//! - **Data Plane** ([`transport`]): length-prefixed binary frames over TCP or
//!   a Unix domain socket, MessagePack payloads
//!
//! ## Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use moniker_sideband::control::{self, JsonRpcControl, OperationShape};
//! use moniker_sideband::{
//!     stream, teardown, DataShape, ElementType, MonikerGroup, SidebandConfig,
//!     SidebandSession, Strategy, TypedPayload,
//! };
//!
//! #[tokio::main]
//! async fn main() -> moniker_sideband::Result<()> {
//!     let config = SidebandConfig::default();
//!     let rpc = JsonRpcControl::new("localhost:31763", &config);
//!
//!     let input = control::create_and_start(&rpc, "Dev1/ai0").await?;
//!     let output = control::create_and_start(&rpc, "Dev1/ao0").await?;
//!     let scalar = OperationShape::new(DataShape::scalar(ElementType::F64));
//!
//!     let mut group = MonikerGroup::new();
//!     group.add_read(control::begin_read(&rpc, &input, &scalar).await?)?;
//!     group.add_write(control::begin_write(&rpc, &output, &scalar).await?)?;
//!
//!     let session = SidebandSession::establish(&rpc, group, Strategy::SocketsLowLatency, &config).await?;
//!     let mut batches = session.run(5, stream::repeat(vec![TypedPayload::scalar(1.0f64)]));
//!     while let Some(batch) = batches.next().await {
//!         println!("{:?}", batch?.slot::<f64>(0)?);
//!     }
//!     drop(batches);
//!
//!     teardown(&session, &rpc, &[input, output]).await.into_result()
//! }
//! ```

pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod moniker;
pub mod negotiate;
pub mod protocol;
#[cfg(feature = "sim")]
pub mod sim;
pub mod stream;
pub mod transport;

mod session;
mod teardown;

pub use codec::{SidebandValues, TypedPayload};
pub use config::SidebandConfig;
pub use error::{Direction, Result, SidebandError};
pub use moniker::{DataShape, ElementType, Extent, Moniker, MonikerGroup, SlotLayout};
pub use negotiate::{negotiate, Negotiated, SessionToken, Strategy, TransportParams};
pub use session::SidebandSession;
pub use stream::ReadBatch;
pub use teardown::{teardown, ResourceStep, TeardownReport};
pub use transport::CloseHandle;
