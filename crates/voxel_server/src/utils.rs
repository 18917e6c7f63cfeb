//! Utility functions for server creation.

use crate::{config::ServerConfig, error::ServerError, server::GameServer};

/// Creates a server with default configuration: one in-memory world named
/// `main`, offline mode, listening on `127.0.0.1:25565`.
pub fn create_server() -> Result<GameServer, ServerError> {
    create_server_with_config(ServerConfig::default())
}

/// Creates a server with the given configuration.
pub fn create_server_with_config(config: ServerConfig) -> Result<GameServer, ServerError> {
    GameServer::new(config)
}
