//! Registry of authenticated sessions.
//!
//! All mutation happens under a single write lock, so the username uniqueness
//! check, player id allocation and insertion are one atomic step.

use super::{PlayerId, Role, Session, MAX_PLAYER_ID};
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::AuthError;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use voxel_protocol::{Location, Packet};

/// A session about to be registered; the registry assigns its player id.
#[derive(Debug, Clone)]
pub struct PendingSession {
    pub connection: ConnectionHandle,
    pub username: String,
    pub world: String,
    pub location: Location,
    pub role: Role,
}

/// Tracks every authenticated session, keyed by connection.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ConnectionId, Session>>,
    capacity: usize,
}

impl SessionRegistry {
    /// Creates a registry admitting at most `max_players` sessions.
    ///
    /// The limit is capped by the number of available player ids.
    pub fn new(max_players: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity: max_players.min(MAX_PLAYER_ID as usize + 1),
        }
    }

    /// Registers a session. It stays hidden from its world until
    /// [`activate`](Self::activate) is called.
    ///
    /// # Errors
    ///
    /// * [`AuthError::DuplicateName`] if a session with the same username
    ///   (case-insensitive) is online
    /// * [`AuthError::ServerFull`] if the player limit is reached
    pub async fn add(&self, pending: PendingSession) -> Result<Session, AuthError> {
        let mut sessions = self.sessions.write().await;

        if sessions
            .values()
            .any(|s| s.username.eq_ignore_ascii_case(&pending.username))
        {
            return Err(AuthError::DuplicateName(pending.username));
        }
        if sessions.len() >= self.capacity {
            return Err(AuthError::ServerFull);
        }

        let player_id = (0..=MAX_PLAYER_ID)
            .find(|id| sessions.values().all(|s| s.player_id != *id))
            .ok_or(AuthError::ServerFull)?;

        let session = Session {
            connection: pending.connection,
            username: pending.username,
            player_id,
            world: pending.world,
            location: pending.location,
            role: pending.role,
            visible: false,
        };
        sessions.insert(session.connection_id(), session.clone());
        debug!(
            "Registered session {} as player {} (connection {})",
            session.username,
            player_id,
            session.connection_id()
        );
        Ok(session)
    }

    /// Removes a session by connection. Idempotent; returns the removed
    /// session the first time only.
    pub async fn remove(&self, connection: ConnectionId) -> Option<Session> {
        self.sessions.write().await.remove(&connection)
    }

    /// Removes `session`. Same semantics as [`remove`](Self::remove).
    pub async fn remove_session(&self, session: &Session) -> Option<Session> {
        self.remove(session.connection_id()).await
    }

    pub async fn find_by_connection(&self, connection: ConnectionId) -> Option<Session> {
        self.sessions.read().await.get(&connection).cloned()
    }

    /// Looks a session up by username, ignoring case.
    pub async fn find_by_username(&self, username: &str) -> Option<Session> {
        self.sessions
            .read()
            .await
            .values()
            .find(|s| s.username.eq_ignore_ascii_case(username))
            .cloned()
    }

    pub async fn find_by_player_id(&self, player_id: PlayerId) -> Option<Session> {
        self.sessions
            .read()
            .await
            .values()
            .find(|s| s.player_id == player_id)
            .cloned()
    }

    /// Makes a session visible to its world.
    ///
    /// The session and every visible peer in the same world are introduced
    /// to each other with spawn packets while the lock is held, so no world
    /// traffic can reach the session ahead of the spawns it refers to.
    /// Returns the updated snapshot, or `None` if the session is gone.
    pub async fn activate(&self, connection: ConnectionId) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get(&connection)?.clone();

        let mut peers: Vec<&Session> = sessions
            .values()
            .filter(|s| s.visible && s.world == session.world && s.connection_id() != connection)
            .collect();
        peers.sort_by_key(|s| s.player_id);
        for peer in peers {
            introduce(&session, peer);
            introduce(peer, &session);
        }

        let entry = sessions.get_mut(&connection)?;
        entry.visible = true;
        Some(entry.clone())
    }

    /// Every visible session currently in `world`, ordered by player id.
    pub async fn all_in_world(&self, world: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.visible && s.world == world)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.player_id);
        sessions
    }

    /// Every session, ordered by player id.
    pub async fn all(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.player_id);
        sessions
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records a new location. Returns the updated snapshot, or `None` if the
    /// session is gone.
    pub async fn update_location(
        &self,
        connection: ConnectionId,
        location: Location,
    ) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&connection)?;
        session.location = location;
        Some(session.clone())
    }

    /// Moves a session to another world at `location`, hidden until it is
    /// activated there. Returns the updated snapshot, or `None` if the
    /// session is gone.
    pub async fn move_to_world(
        &self,
        connection: ConnectionId,
        world: &str,
        location: Location,
    ) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&connection)?;
        session.world = world.to_string();
        session.location = location;
        session.visible = false;
        Some(session.clone())
    }
}

/// Queues a spawn of `subject` for `recipient`.
fn introduce(recipient: &Session, subject: &Session) {
    let spawn = Packet::SpawnPlayer {
        player_id: subject.player_id,
        name: subject.username.clone(),
        location: subject.location,
    };
    if let Err(e) = recipient.connection.send(spawn) {
        warn!(
            "Could not introduce {} to {}: {}",
            subject.username, recipient.username, e
        );
    }
}
