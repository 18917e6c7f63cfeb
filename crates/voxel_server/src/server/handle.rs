//! Shared server state and the handle plugins use to act on it.

use crate::broadcast::BroadcastRouter;
use crate::config::ServerConfig;
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::{ServerError, WorldError};
use crate::session::{Session, SessionRegistry};
use crate::world::{World, Worlds};
use std::sync::Arc;
use tracing::{error, info};
use voxel_protocol::{BlockPos, Identification, Location, Packet, PROTOCOL_VERSION, SELF_ID};

struct ServerState {
    config: ServerConfig,
    sessions: Arc<SessionRegistry>,
    worlds: Arc<Worlds>,
    router: BroadcastRouter,
}

/// Cheaply clonable access to the running server.
///
/// Handed to plugins through [`HookContext`](crate::hooks::HookContext) and
/// used by connection tasks for everything that touches more than one
/// session.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("server_name", &self.state.config.server_name)
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    /// Builds the shared state, opening every configured world.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let worlds = Worlds::open_all(&config.default_world, &config.worlds)?;
        let sessions = Arc::new(SessionRegistry::new(config.max_players));
        let router = BroadcastRouter::new(sessions.clone());
        Ok(Self {
            state: Arc::new(ServerState {
                config,
                sessions,
                worlds: Arc::new(worlds),
                router,
            }),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.state.sessions
    }

    pub fn worlds(&self) -> &Arc<Worlds> {
        &self.state.worlds
    }

    pub fn router(&self) -> &BroadcastRouter {
        &self.state.router
    }

    /// Sends a server message to one connection.
    pub fn send_text(&self, connection: &ConnectionHandle, text: &str) {
        self.state.router.send_text(connection, text);
    }

    /// Sends a server message to everyone in `world`.
    pub async fn broadcast_text(&self, world: &str, text: &str) -> usize {
        self.state.router.broadcast_text(world, text).await
    }

    pub async fn online_count(&self) -> usize {
        self.state.sessions.len().await
    }

    /// Usernames in `world`, ordered by player id.
    pub async fn players_in_world(&self, world: &str) -> Vec<String> {
        self.state
            .sessions
            .all_in_world(world)
            .await
            .into_iter()
            .map(|s| s.username)
            .collect()
    }

    pub fn world_names(&self) -> Vec<String> {
        self.state.worlds.names()
    }

    pub async fn world_spawn(&self, world: &str) -> Option<BlockPos> {
        match self.state.worlds.get(world) {
            Some(world) => Some(world.spawn().await),
            None => None,
        }
    }

    /// Disconnects a session with `reason`. Returns `false` if no session is
    /// bound to `connection`.
    pub async fn kick(&self, connection: ConnectionId, reason: &str) -> bool {
        let Some(session) = self.state.sessions.find_by_connection(connection).await else {
            return false;
        };
        // The writer flushes the notice before the socket closes.
        let _ = session.connection.send(Packet::disconnect(reason));
        session.connection.close();
        info!("👢 Kicked {}: {}", session.username, reason);
        true
    }

    /// Moves a session to another world: despawn and save in the old one,
    /// level transfer and spawn in the new one.
    pub async fn transfer(&self, connection: ConnectionId, world: &str) -> Result<(), ServerError> {
        let target = self
            .state
            .worlds
            .get(world)
            .ok_or_else(|| WorldError::NotFound(world.to_string()))?;
        let session = self
            .state
            .sessions
            .find_by_connection(connection)
            .await
            .ok_or_else(|| ServerError::Internal(format!("no session on connection {connection}")))?;

        if session.world == target.name() {
            self.send_text(&session.connection, &format!("&eYou are already in {}", world));
            return Ok(());
        }

        let arrival = Location::standing_on(target.spawn().await);
        let moved = self
            .state
            .sessions
            .move_to_world(connection, target.name(), arrival)
            .await
            .ok_or_else(|| ServerError::Internal(format!("session on connection {connection} is gone")))?;

        self.leave_world(&session, &format!("&e{} went to {}", session.username, world))
            .await;
        self.enter_world(
            &moved,
            &target,
            &format!("&e{} arrived from {}", moved.username, session.world),
        )
        .await?;
        info!("🌍 {} moved from {} to {}", moved.username, session.world, world);
        Ok(())
    }

    /// Acknowledges a successful identification.
    pub(crate) async fn welcome(&self, session: &Session) -> Result<(), ServerError> {
        session
            .connection
            .send_async(Packet::Identification(Identification {
                protocol_version: PROTOCOL_VERSION,
                name: self.state.config.server_name.clone(),
                key: self.state.config.motd.clone(),
                user_type: session.role.user_type(),
            }))
            .await
    }

    /// Sends `world` to `session` and introduces it to everyone there.
    ///
    /// The session must already be registered in `world`, still hidden. It
    /// only starts receiving world traffic once the level and its own spawn
    /// are queued.
    pub(crate) async fn enter_world(
        &self,
        session: &Session,
        world: &World,
        announcement: &str,
    ) -> Result<(), ServerError> {
        let level = world.level_data().await?;
        for packet in level.packets() {
            session.connection.send_async(packet).await?;
        }

        session
            .connection
            .send_async(Packet::SpawnPlayer {
                player_id: SELF_ID,
                name: session.username.clone(),
                location: session.location,
            })
            .await?;

        if self
            .state
            .sessions
            .activate(session.connection_id())
            .await
            .is_none()
        {
            return Err(ServerError::Internal(format!(
                "session {} left before entering {}",
                session.username,
                world.name()
            )));
        }

        self.state
            .router
            .broadcast_text(world.name(), announcement)
            .await;
        Ok(())
    }

    /// Removes `session` from the view of its world and saves the world.
    ///
    /// `session` is the snapshot from before the departure; it must no longer
    /// be registered in that world.
    pub(crate) async fn leave_world(&self, session: &Session, announcement: &str) {
        // Peers never saw a session that left before it was activated.
        if session.visible {
            let router = &self.state.router;
            router
                .broadcast_to_world(
                    &session.world,
                    |_| Packet::Despawn {
                        player_id: session.player_id,
                    },
                    Some(session.connection_id()),
                )
                .await;
            router.broadcast_text(&session.world, announcement).await;
        }

        if let Some(world) = self.state.worlds.get(&session.world) {
            if let Err(e) = world.save().await {
                error!("❌ Failed to save world {}: {}", world.name(), e);
            }
        }
    }

    /// Disconnects every session and saves every world.
    pub(crate) async fn shutdown(&self, reason: &str) {
        let sessions = self.state.sessions.all().await;
        info!("Disconnecting {} players", sessions.len());
        for session in sessions {
            self.kick(session.connection_id(), reason).await;
        }
        let failures = self.state.worlds.save_all().await;
        if failures == 0 {
            info!("💾 All worlds saved");
        }
    }
}
