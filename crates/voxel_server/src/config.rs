//! Server configuration types and defaults.
//!
//! This module contains the server configuration structure and default values
//! used to initialize and customize the session server behavior.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Configuration structure for the session server.
///
/// Contains network settings, identity strings shown to clients, limits,
/// authentication, the worlds to host and background task cadence.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Server name sent in the identification acknowledgment
    pub server_name: String,

    /// Message of the day sent in the identification acknowledgment
    pub motd: String,

    /// Maximum number of concurrent players (capped at 128 by the wire ids)
    pub max_players: usize,

    /// Maximum number of concurrent TCP connections, authenticated or not
    pub max_connections: usize,

    /// Read timeout in seconds (0 disables it)
    pub connection_timeout: u64,

    /// Keep-alive ping interval in seconds (0 disables it)
    pub ping_interval_secs: u64,

    /// Capacity of each connection's outbound packet queue
    pub outbound_queue: usize,

    /// Name verification settings
    pub auth: AuthConfig,

    /// Usernames granted operator rights (case-insensitive)
    pub operators: Vec<String>,

    /// World new players are placed in
    pub default_world: String,

    /// Worlds hosted by this server
    pub worlds: Vec<WorldConfig>,

    /// Radius around spawn that only operators may edit (0 disables it)
    pub spawn_protection_radius: u16,

    /// Presence announcement settings
    pub heartbeat: HeartbeatConfig,
}

/// Name verification settings.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Whether clients must present a valid verification token
    pub online_mode: bool,

    /// Secret shared with the directory service; `None` disables verification
    pub secret: Option<String>,
}

/// A hosted world.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    pub name: String,
    pub width: i16,
    pub height: i16,
    pub length: i16,
    /// Save file; the world is kept in memory only when absent
    pub path: Option<PathBuf>,
}

impl WorldConfig {
    pub fn new(name: impl Into<String>, width: i16, height: i16, length: i16) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            length,
            path: None,
        }
    }
}

/// Presence announcement settings.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub public: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 45,
            public: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 25565)),
            server_name: "Voxel Server".to_string(),
            motd: "Welcome!".to_string(),
            max_players: 64,
            max_connections: 256,
            connection_timeout: 60,
            ping_interval_secs: 5,
            outbound_queue: 1024,
            auth: AuthConfig::default(),
            operators: Vec::new(),
            default_world: "main".to_string(),
            worlds: vec![WorldConfig::new("main", 128, 64, 128)],
            spawn_protection_radius: 0,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Whether `username` is on the operator allow-list.
    pub fn is_operator(&self, username: &str) -> bool {
        self.operators
            .iter()
            .any(|op| op.eq_ignore_ascii_case(username))
    }
}
