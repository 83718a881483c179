//! Transport module - the sideband data connection.
//!
//! - [`Endpoint`] / [`SidebandListener`]: TCP or Unix Domain Socket endpoints
//! - [`FrameReader`] / [`write_frames`]: frame I/O over any split stream
//! - [`SidebandTransport`]: Open / Send / Receive / Close bound to a session token

mod reader;
mod sideband;
mod socket;
mod writer;

pub use reader::FrameReader;
pub use sideband::{CloseHandle, SidebandTransport};
pub use socket::{
    connect, generate_socket_path, BoxedReader, BoxedWriter, Endpoint, SidebandListener,
};
pub use writer::{write_frames, OutboundFrame};
