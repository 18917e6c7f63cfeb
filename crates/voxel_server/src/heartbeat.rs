//! Presence announcements.
//!
//! Periodically tells a directory service that this server is online, how
//! many players it holds and which secret it verifies names against.

use crate::error::ServerError;
use crate::server::ServerHandle;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

/// One presence announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Announcement {
    pub name: String,
    pub port: u16,
    pub users: usize,
    pub max: usize,
    pub public: bool,
    pub online_mode: bool,
    /// Never logged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    pub software: String,
}

impl Announcement {
    /// Current announcement for the server behind `server`.
    pub async fn snapshot(server: &ServerHandle, port: u16) -> Self {
        let config = server.config();
        Self {
            name: config.server_name.clone(),
            port,
            users: server.online_count().await,
            max: server.sessions().capacity(),
            public: config.heartbeat.public,
            online_mode: config.auth.online_mode,
            salt: config.auth.secret.clone(),
            software: concat!("voxel_server/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Copy without the secret, safe to log.
    pub fn redacted(&self) -> Self {
        Self {
            salt: None,
            ..self.clone()
        }
    }
}

/// Destination of presence announcements.
#[async_trait]
pub trait PresenceSink: Send + Sync {
    async fn announce(&self, announcement: &Announcement) -> Result<(), ServerError>;
}

/// Writes announcements to the log as JSON.
#[derive(Debug, Default)]
pub struct LogPresence;

#[async_trait]
impl PresenceSink for LogPresence {
    async fn announce(&self, announcement: &Announcement) -> Result<(), ServerError> {
        let payload = serde_json::to_string(&announcement.redacted())
            .map_err(|e| ServerError::Internal(format!("Failed to serialize announcement: {e}")))?;
        info!(target: "voxel_server::heartbeat", "📣 {}", payload);
        Ok(())
    }
}

/// Announces presence every `period` until the task is aborted.
pub fn spawn(
    server: ServerHandle,
    sink: Arc<dyn PresenceSink>,
    port: u16,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let announcement = Announcement::snapshot(&server, port).await;
            if let Err(e) = sink.announce(&announcement).await {
                warn!("Presence announcement failed: {}", e);
            }
        }
    })
}
