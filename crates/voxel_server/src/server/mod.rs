//! Server orchestration: the accept loop, per-connection tasks and the
//! handle shared with plugins.

pub(crate) mod connection;
pub mod core;
pub mod handle;

pub use self::core::GameServer;
pub use handle::ServerHandle;
