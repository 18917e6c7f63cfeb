//! Fan-out of packets to sessions.

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::session::{Session, SessionRegistry};
use std::sync::Arc;
use tracing::debug;
use voxel_protocol::text::chat_chunks;
use voxel_protocol::{Packet, SELF_ID};

/// Player id used for messages that come from the server itself.
pub const SERVER_MESSAGE_ID: i8 = SELF_ID;

/// Routes packets to the sessions of a world.
///
/// Delivery is fire-and-forget: a session whose queue is full or whose
/// connection is closing is skipped and the rest still receive the packet.
#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    sessions: Arc<SessionRegistry>,
}

impl BroadcastRouter {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    /// Sends `factory(session)` to every session in `world` except `exclude`.
    ///
    /// Returns how many sessions the packet was queued for.
    pub async fn broadcast_to_world<F>(
        &self,
        world: &str,
        factory: F,
        exclude: Option<ConnectionId>,
    ) -> usize
    where
        F: FnMut(&Session) -> Packet,
    {
        let recipients = self.sessions.all_in_world(world).await;
        fan_out(&recipients, factory, exclude)
    }

    /// Sends `factory(session)` to every session on the server except `exclude`.
    pub async fn broadcast_all<F>(&self, factory: F, exclude: Option<ConnectionId>) -> usize
    where
        F: FnMut(&Session) -> Packet,
    {
        let recipients = self.sessions.all().await;
        fan_out(&recipients, factory, exclude)
    }

    /// Sends a server message to every session in `world`, split into
    /// message-sized chunks.
    pub async fn broadcast_text(&self, world: &str, text: &str) -> usize {
        self.broadcast_chat(world, SERVER_MESSAGE_ID, text).await
    }

    /// Like [`broadcast_text`](Self::broadcast_text) but attributed to `sender_id`.
    pub async fn broadcast_chat(&self, world: &str, sender_id: i8, text: &str) -> usize {
        let chunks = chat_chunks(text);
        let recipients = self.sessions.all_in_world(world).await;
        let mut delivered = 0;
        for session in &recipients {
            if chunks
                .iter()
                .all(|chunk| deliver(session, Packet::message(sender_id, chunk.as_str())))
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Sends a server message to a single connection.
    pub fn send_text(&self, connection: &ConnectionHandle, text: &str) -> bool {
        chat_chunks(text).into_iter().all(|chunk| {
            connection
                .send(Packet::message(SERVER_MESSAGE_ID, chunk))
                .map_err(|e| debug!("Dropped message for connection {}: {}", connection.id(), e))
                .is_ok()
        })
    }
}

fn fan_out<F>(recipients: &[Session], mut factory: F, exclude: Option<ConnectionId>) -> usize
where
    F: FnMut(&Session) -> Packet,
{
    recipients
        .iter()
        .filter(|session| Some(session.connection_id()) != exclude)
        .filter(|session| deliver(session, factory(session)))
        .count()
}

fn deliver(session: &Session, packet: Packet) -> bool {
    match session.connection.send(packet) {
        Ok(()) => true,
        Err(e) => {
            debug!("Skipping {} during broadcast: {}", session.username, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{PendingSession, Role};
    use tokio::sync::mpsc;
    use voxel_protocol::Location;

    async fn join(
        registry: &SessionRegistry,
        id: ConnectionId,
        name: &str,
        world: &str,
    ) -> (Session, mpsc::Receiver<Packet>) {
        let (connection, rx) = ConnectionHandle::new(id, "127.0.0.1:1".parse().unwrap(), 16);
        let session = registry
            .add(PendingSession {
                connection,
                username: name.to_string(),
                world: world.to_string(),
                location: Location::default(),
                role: Role::Player,
            })
            .await
            .unwrap();
        registry.activate(id).await.unwrap();
        (session, rx)
    }

    /// Drops the spawn packets exchanged while joining.
    fn settle(receivers: &mut [&mut mpsc::Receiver<Packet>]) {
        for rx in receivers.iter_mut() {
            while rx.try_recv().is_ok() {}
        }
    }

    #[tokio::test]
    async fn world_broadcast_respects_scope_and_exclusion() {
        let registry = Arc::new(SessionRegistry::new(8));
        let router = BroadcastRouter::new(registry.clone());
        let (alice, mut alice_rx) = join(&registry, 1, "alice", "main").await;
        let (_bob, mut bob_rx) = join(&registry, 2, "bob", "main").await;
        let (_carol, mut carol_rx) = join(&registry, 3, "carol", "nether").await;
        settle(&mut [&mut alice_rx, &mut bob_rx, &mut carol_rx]);

        let sent = router
            .broadcast_to_world(
                "main",
                |_| Packet::Despawn {
                    player_id: alice.player_id,
                },
                Some(alice.connection_id()),
            )
            .await;

        assert_eq!(sent, 1);
        assert_eq!(
            bob_rx.try_recv().unwrap(),
            Packet::Despawn {
                player_id: alice.player_id
            }
        );
        assert!(alice_rx.try_recv().is_err());
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn factory_sees_each_recipient() {
        let registry = Arc::new(SessionRegistry::new(8));
        let router = BroadcastRouter::new(registry.clone());
        let (_a, mut a_rx) = join(&registry, 1, "alice", "main").await;
        let (_b, mut b_rx) = join(&registry, 2, "bob", "main").await;
        settle(&mut [&mut a_rx, &mut b_rx]);

        router
            .broadcast_to_world("main", |s| Packet::message(-1, format!("hi {}", s.username)), None)
            .await;

        assert_eq!(a_rx.try_recv().unwrap(), Packet::message(-1, "hi alice"));
        assert_eq!(b_rx.try_recv().unwrap(), Packet::message(-1, "hi bob"));
    }

    #[tokio::test]
    async fn long_text_is_chunked() {
        let registry = Arc::new(SessionRegistry::new(8));
        let router = BroadcastRouter::new(registry.clone());
        let (_a, mut rx) = join(&registry, 1, "alice", "main").await;

        let text = "x".repeat(130);
        assert_eq!(router.broadcast_text("main", &text).await, 1);

        let mut chunks = 0;
        while let Ok(Packet::Message { player_id, text }) = rx.try_recv() {
            assert_eq!(player_id, SERVER_MESSAGE_ID);
            assert!(text.len() <= 64);
            chunks += 1;
        }
        assert_eq!(chunks, 3);
    }

    #[tokio::test]
    async fn closed_recipients_are_skipped() {
        let registry = Arc::new(SessionRegistry::new(8));
        let router = BroadcastRouter::new(registry.clone());
        let (alice, _alice_rx) = join(&registry, 1, "alice", "main").await;
        let (_bob, mut bob_rx) = join(&registry, 2, "bob", "main").await;
        settle(&mut [&mut bob_rx]);
        alice.connection.close();

        assert_eq!(router.broadcast_all(|_| Packet::Ping, None).await, 1);
        assert_eq!(bob_rx.try_recv().unwrap(), Packet::Ping);
    }

    #[tokio::test]
    async fn hidden_sessions_receive_no_world_traffic() {
        let registry = Arc::new(SessionRegistry::new(8));
        let router = BroadcastRouter::new(registry.clone());
        let (_alice, mut alice_rx) = join(&registry, 1, "alice", "main").await;
        let (connection, mut bob_rx) = ConnectionHandle::new(2, "127.0.0.1:2".parse().unwrap(), 16);
        registry
            .add(PendingSession {
                connection,
                username: "bob".to_string(),
                world: "main".to_string(),
                location: Location::default(),
                role: Role::Player,
            })
            .await
            .unwrap();

        assert_eq!(router.broadcast_text("main", "hello").await, 1);
        assert!(alice_rx.try_recv().is_ok());
        assert!(bob_rx.try_recv().is_err());
    }
}
