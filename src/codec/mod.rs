//! Codec module - typed payloads and their wire encoding.
//!
//! - [`TypedPayload`] - one tagged vector of primitive values per moniker slot
//! - [`SidebandValues`] - the ordered batch carried by a `WRITE` or `READ` frame
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//!
//! # Design
//!
//! The codec is a marker struct with static methods rather than a trait
//! object; there is exactly one body encoding on the sideband stream.

mod msgpack;
mod payload;

pub use msgpack::MsgPackCodec;
pub use payload::{Element, SidebandValues, TypedPayload};
