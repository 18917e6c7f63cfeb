//! Configuration management for the voxel server host.
//!
//! Handles loading, validation and conversion of the TOML configuration
//! file into the [`ServerConfig`] consumed by the server crate.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use voxel_server::config::{AuthConfig, HeartbeatConfig, WorldConfig};
use voxel_server::ServerConfig;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Network and identity settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Name verification settings
    #[serde(default)]
    pub auth: AuthSettings,
    /// Hosted worlds
    #[serde(default = "default_worlds")]
    pub worlds: Vec<WorldSettings>,
    /// Presence announcement settings
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default = "default_motd")]
    pub motd: String,
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds of read silence before a client is dropped
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_world_name")]
    pub default_world: String,
    #[serde(default)]
    pub operators: Vec<String>,
    #[serde(default)]
    pub spawn_protection_radius: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthSettings {
    #[serde(default)]
    pub online_mode: bool,
    /// Shared with the server list; empty means none has been handed out
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSettings {
    pub name: String,
    pub width: i16,
    pub height: i16,
    pub length: i16,
    /// Save file path; worlds without one are not persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval")]
    pub interval: u64,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,
    /// JSON formatting
    #[serde(default)]
    pub json_format: bool,
}

fn default_bind_address() -> String {
    "0.0.0.0:25565".to_string()
}
fn default_server_name() -> String {
    "Voxel Server".to_string()
}
fn default_motd() -> String {
    "Welcome!".to_string()
}
fn default_max_players() -> usize {
    64
}
fn default_max_connections() -> usize {
    256
}
fn default_connection_timeout() -> u64 {
    60
}
fn default_ping_interval() -> u64 {
    5
}
fn default_world_name() -> String {
    "main".to_string()
}
fn default_worlds() -> Vec<WorldSettings> {
    vec![WorldSettings {
        name: default_world_name(),
        width: 128,
        height: 64,
        length: 128,
        path: Some("worlds/main.vxl".to_string()),
    }]
}
fn default_heartbeat_interval() -> u64 {
    45
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            auth: AuthSettings::default(),
            worlds: default_worlds(),
            heartbeat: HeartbeatSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            name: default_server_name(),
            motd: default_motd(),
            max_players: default_max_players(),
            max_connections: default_max_connections(),
            connection_timeout: default_connection_timeout(),
            ping_interval: default_ping_interval(),
            default_world: default_world_name(),
            operators: Vec::new(),
            spawn_protection_radius: 0,
        }
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_heartbeat_interval(),
            public: false,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from file, writing the defaults there first if it
    /// does not exist yet.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("📝 Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Convert to the server crate's [`ServerConfig`].
    ///
    /// An empty secret stays unset: clients can only compute tokens from a
    /// secret the server list has been given, so names go unverified until
    /// one is configured.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let secret = (!self.auth.secret.is_empty()).then(|| self.auth.secret.clone());
        if self.auth.online_mode && secret.is_none() {
            warn!("⚠️ Online mode is on but no secret is configured, names are not verified");
        }

        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            server_name: self.server.name.clone(),
            motd: self.server.motd.clone(),
            max_players: self.server.max_players,
            max_connections: self.server.max_connections,
            connection_timeout: self.server.connection_timeout,
            ping_interval_secs: self.server.ping_interval,
            auth: AuthConfig {
                online_mode: self.auth.online_mode,
                secret,
            },
            operators: self.server.operators.clone(),
            default_world: self.server.default_world.clone(),
            worlds: self
                .worlds
                .iter()
                .map(|world| WorldConfig {
                    name: world.name.clone(),
                    width: world.width,
                    height: world.height,
                    length: world.length,
                    path: world.path.as_ref().map(PathBuf::from),
                })
                .collect(),
            spawn_protection_radius: self.server.spawn_protection_radius,
            heartbeat: HeartbeatConfig {
                enabled: self.heartbeat.enabled,
                interval_secs: self.heartbeat.interval,
                public: self.heartbeat.public,
            },
            ..ServerConfig::default()
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self
            .server
            .bind_address
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(format!(
                "Invalid bind address: {}",
                self.server.bind_address
            ));
        }

        if self.server.max_players == 0 || self.server.max_players > 128 {
            return Err(format!(
                "max_players must be between 1 and 128, got {}",
                self.server.max_players
            ));
        }

        if self.worlds.is_empty() {
            return Err("At least one world must be configured".to_string());
        }
        for world in &self.worlds {
            if world.width <= 0 || world.height <= 0 || world.length <= 0 {
                return Err(format!(
                    "World {} has invalid dimensions {}x{}x{}",
                    world.name, world.width, world.height, world.length
                ));
            }
        }
        if !self
            .worlds
            .iter()
            .any(|world| world.name == self.server.default_world)
        {
            return Err(format!(
                "Default world {} is not configured",
                self.server.default_world
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            ));
        }

        Ok(())
    }
}
