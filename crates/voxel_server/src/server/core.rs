//! Core game server implementation.
//!
//! This module contains the main `GameServer` struct: it binds the listener,
//! accepts connections, runs the background tasks (keep-alive pings and
//! presence announcements) and performs the orderly shutdown.

use super::connection::handle_connection;
use super::handle::ServerHandle;
use crate::config::ServerConfig;
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::ServerError;
use crate::heartbeat::{self, LogPresence, PresenceSink};
use crate::hooks::builtin::{SpawnProtection, WhoPlugin, WorldsPlugin};
use crate::hooks::{HookPipeline, Plugin, PluginRegistry};
use dashmap::DashMap;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use voxel_protocol::Packet;

/// How long shutdown waits for closed connections to finish their cleanup.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const SHUTDOWN_REASON: &str = "Server shutting down";

/// The session server.
///
/// `GameServer` owns the shared state (sessions, worlds, broadcast router),
/// the plugin registry and the hook pipeline, and drives the accept loop.
pub struct GameServer {
    /// Server configuration settings
    config: ServerConfig,

    /// Shared state, also handed to plugins
    handle: ServerHandle,

    /// Registered plugins
    plugins: Arc<PluginRegistry>,

    /// Hook dispatch over `plugins`
    hooks: Arc<HookPipeline>,

    /// Where presence announcements go
    presence: Arc<dyn PresenceSink>,

    /// Signals the accept loop to stop
    shutdown_token: CancellationToken,

    next_connection_id: AtomicUsize,

    /// Caps concurrent connections, authenticated or not
    connection_slots: Arc<Semaphore>,

    /// Every live connection, including those still identifying
    connections: Arc<DashMap<ConnectionId, ConnectionHandle>>,
}

impl GameServer {
    /// Creates a new server with the specified configuration.
    ///
    /// Opens every configured world and registers the built-in plugins
    /// (`/who`, `/worlds`, `/goto` and spawn protection).
    ///
    /// # Errors
    ///
    /// Fails if a world cannot be opened or the default world is missing.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let handle = ServerHandle::new(config.clone())?;

        let builtin: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(WhoPlugin),
            Arc::new(WorldsPlugin),
            Arc::new(SpawnProtection::new(config.spawn_protection_radius)),
        ];
        let plugins = Arc::new(PluginRegistry::with_plugins(builtin));
        let hooks = Arc::new(HookPipeline::new(plugins.clone()));
        let connection_slots = Arc::new(Semaphore::new(config.max_connections.max(1)));

        Ok(Self {
            config,
            handle,
            plugins,
            hooks,
            presence: Arc::new(LogPresence),
            shutdown_token: CancellationToken::new(),
            next_connection_id: AtomicUsize::new(1),
            connection_slots,
            connections: Arc::new(DashMap::new()),
        })
    }

    /// Replaces the default logging presence sink.
    pub fn with_presence_sink(mut self, sink: Arc<dyn PresenceSink>) -> Self {
        self.presence = sink;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Access to sessions, worlds and broadcast, as plugins see it.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn plugins(&self) -> Arc<PluginRegistry> {
        self.plugins.clone()
    }

    pub fn hooks(&self) -> Arc<HookPipeline> {
        self.hooks.clone()
    }

    /// Open connections, logged in or not.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Binds the configured address.
    ///
    /// Port 0 picks a free port; read it back from the returned listener.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.config.bind_address;
        let domain = match address {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
        if let Err(e) = socket.set_reuse_address(true) {
            warn!("Failed to set SO_REUSEADDR: {}", e);
        }

        socket
            .bind(&address.into())
            .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;
        socket
            .listen(1024)
            .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::Network(format!("Failed to set non-blocking: {e}")))?;

        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))?;
        info!("✅ Listener bound on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Binds and serves until [`shutdown`](Self::shutdown) is called.
    pub async fn start(&self) -> Result<(), ServerError> {
        info!("🚀 Starting voxel server on {}", self.config.bind_address);
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Accepts connections on `listener` until shutdown, then disconnects
    /// every client, saves every world and stops every plugin.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!(
            "🌍 Hosting worlds {:?} (default: {})",
            self.handle.world_names(),
            self.config.default_world
        );
        info!("🔌 Plugins: {:?}", self.plugins.names().await);

        let mut background = Vec::new();
        if let Some(task) = self.start_keep_alive() {
            background.push(task);
        }
        if self.config.heartbeat.enabled {
            let port = listener.local_addr()?.port();
            background.push(heartbeat::spawn(
                self.handle.clone(),
                self.presence.clone(),
                port,
                Duration::from_secs(self.config.heartbeat.interval_secs.max(1)),
            ));
        }

        tokio::select! {
            _ = self.accept_loop(&listener) => {}
            _ = self.shutdown_token.cancelled() => {
                info!("Shutdown signal received");
            }
        }
        drop(listener);

        info!("🧹 Performing server cleanup...");
        for task in &background {
            task.abort();
        }
        self.handle.shutdown(SHUTDOWN_REASON).await;
        self.close_connections(SHUTDOWN_REASON);
        self.wait_for_connections_to_drain().await;
        self.hooks.shutdown().await;
        info!("✅ Server cleanup completed");

        info!("Server stopped");
        Ok(())
    }

    async fn accept_loop(&self, listener: &TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let Ok(permit) = self.connection_slots.clone().try_acquire_owned() else {
                        warn!("🚧 Connection limit reached, refusing {}", addr);
                        drop(stream);
                        continue;
                    };
                    let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                    let (handle, outbound) =
                        ConnectionHandle::new(id, addr, self.config.outbound_queue);
                    self.connections.insert(id, handle.clone());
                    let connections = self.connections.clone();
                    let server = self.handle.clone();
                    let hooks = self.hooks.clone();
                    debug!("Accepted connection {} from {}", id, addr);

                    // Spawn individual connection handler
                    tokio::spawn(async move {
                        let _permit = permit;
                        // Failures are logged by the connection itself.
                        let _ = handle_connection(stream, handle, outbound, server, hooks).await;
                        connections.remove(&id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    break;
                }
            }
        }
    }

    /// Pings every session periodically so dead sockets are noticed.
    fn start_keep_alive(&self) -> Option<JoinHandle<()>> {
        if self.config.ping_interval_secs == 0 {
            info!("⏸️ Keep-alive pings disabled");
            return None;
        }
        let router = self.handle.router().clone();
        let period = Duration::from_secs(self.config.ping_interval_secs);

        Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                router.broadcast_all(|_| Packet::Ping, None).await;
            }
        }))
    }

    /// Closes connections that are still open after the sessions were
    /// kicked, which are the ones that never finished logging in.
    fn close_connections(&self, reason: &str) {
        let mut closed = 0;
        for entry in self.connections.iter() {
            let connection = entry.value();
            if connection.is_closed() {
                continue;
            }
            let _ = connection.send(Packet::disconnect(reason));
            connection.close();
            closed += 1;
        }
        if closed > 0 {
            info!("🔌 Closed {} connections that had not logged in", closed);
        }
    }

    async fn wait_for_connections_to_drain(&self) {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while !self.connections.is_empty() {
            if Instant::now() >= deadline {
                warn!(
                    "{} connections still open after shutdown grace period",
                    self.connections.len()
                );
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    /// Initiates server shutdown.
    ///
    /// Signals the accept loop to stop; [`serve`](Self::serve) then performs
    /// the cleanup and returns.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down server...");
        self.shutdown_token.cancel();
        Ok(())
    }
}
