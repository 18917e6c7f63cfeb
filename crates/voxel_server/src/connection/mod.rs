//! Connection plumbing shared by sessions and the server loop.
//!
//! Every accepted socket gets a [`ConnectionHandle`] (an outbound packet
//! queue plus a close signal) and a writer task draining that queue into the
//! socket. Everything else in the server talks to clients through handles.

pub mod handle;
pub(crate) mod writer;

pub use handle::ConnectionHandle;

/// Type alias for connection identifiers.
///
/// Connection IDs are used to uniquely identify client connections
/// throughout their lifecycle on the server.
pub type ConnectionId = usize;
