//! Error types for the session server.
//!
//! The variants follow how each failure is handled:
//!
//! * **Framing** - the byte stream is unusable, the connection is closed
//! * **Auth** - a disconnect notice is sent, then the connection is closed
//! * **Plugin** - logged and treated as "no veto", never reaches a connection
//! * **Transport** - treated like a clean EOF (session removal, world save)
//! * **World** - block storage and persistence failures

use std::io;
use thiserror::Error;
use voxel_protocol::FramingError;

/// Errors that can occur during server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Network-related error (binding, accepting, send failures)
    #[error("Network error: {0}")]
    Network(String),

    /// Internal server error (invalid state, missing resources)
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("World error: {0}")]
    World(#[from] WorldError),

    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Reasons an identification is refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("verification token does not match for {0}")]
    InvalidToken(String),

    #[error("name {0} is already in use")]
    DuplicateName(String),

    #[error("unsupported protocol version {0}")]
    UnsupportedProtocol(u8),

    #[error("invalid username {0:?}")]
    InvalidName(String),

    #[error("server is full")]
    ServerFull,

    #[error("identification was already processed")]
    AlreadyProcessed,
}

impl AuthError {
    /// Human-readable reason carried by the disconnect notice.
    pub fn disconnect_reason(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "Login failed! Could not verify your name",
            Self::DuplicateName(_) => "That name is already in use",
            Self::UnsupportedProtocol(_) => "Unsupported protocol version",
            Self::InvalidName(_) => "Invalid username",
            Self::ServerFull => "Server is full",
            Self::AlreadyProcessed => "Already identified",
        }
    }
}

/// Errors raised by plugins or the plugin registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// Plugin initialization failed during startup
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),
    /// Error occurred during plugin execution
    #[error("Plugin execution error: {0}")]
    ExecutionError(String),
    /// Requested plugin was not found
    #[error("Plugin not found: {0}")]
    NotFound(String),
    /// Runtime error such as panic or system failure
    #[error("Plugin runtime error: {0}")]
    Runtime(String),
}

/// Block storage and persistence failures.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("world {0} does not exist")]
    NotFound(String),

    #[error("block ({x}, {y}, {z}) is outside the world")]
    OutOfBounds { x: i16, y: i16, z: i16 },

    #[error("invalid world dimensions {width}x{height}x{length}")]
    InvalidDimensions { width: i16, height: i16, length: i16 },

    #[error("corrupt world data: {0}")]
    Corrupt(String),

    #[error("world I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("world task failed: {0}")]
    Task(String),
}
