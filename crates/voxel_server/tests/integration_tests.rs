//! End-to-end tests over loopback TCP.
//!
//! Each test starts a server on an ephemeral port and talks to it with a
//! minimal client built on the clientbound side of the packet codec.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use voxel_protocol::{
    BlockMode, BlockPos, Identification, Location, Packet, PacketCodec, PROTOCOL_VERSION, SELF_ID,
};
use voxel_server::auth::verification_token;
use voxel_server::config::{AuthConfig, WorldConfig};
use voxel_server::error::PluginError;
use voxel_server::hooks::{BlockChange, HookContext, Plugin};
use voxel_server::{GameServer, ServerConfig};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(300);

struct TestServer {
    server: Arc<GameServer>,
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        let server = Arc::new(GameServer::new(config).expect("valid config"));
        let listener = server.bind().expect("bind");
        let addr = listener.local_addr().unwrap();
        let serving = server.clone();
        let task = tokio::spawn(async move {
            serving.serve(listener).await.expect("serve");
        });
        Self { server, addr, task }
    }

    async fn stop(self) {
        self.server.shutdown().await.unwrap();
        timeout(RECV_TIMEOUT, self.task)
            .await
            .expect("server stops")
            .unwrap();
    }
}

fn config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        server_name: "Test Server".into(),
        motd: "Have fun".into(),
        ping_interval_secs: 0,
        worlds: vec![
            WorldConfig::new("main", 16, 16, 16),
            WorldConfig::new("nether", 8, 8, 8),
        ],
        ..Default::default()
    }
}

struct TestClient {
    reader: FramedRead<OwnedReadHalf, PacketCodec>,
    writer: FramedWrite<OwnedWriteHalf, PacketCodec>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read, write) = stream.into_split();
        Self {
            reader: FramedRead::new(read, PacketCodec::client()),
            writer: FramedWrite::new(write, PacketCodec::client()),
        }
    }

    /// Connects, identifies and waits until the world has been received.
    async fn login(addr: SocketAddr, name: &str, key: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.identify(name, key).await;
        client
            .recv_until(|p| matches!(p, Packet::SpawnPlayer { player_id, .. } if *player_id == SELF_ID))
            .await;
        client
            .recv_until(|p| matches!(p, Packet::Message { text, .. } if text.contains("joined")))
            .await;
        client
    }

    async fn identify(&mut self, name: &str, key: &str) {
        self.send(Packet::Identification(Identification {
            protocol_version: PROTOCOL_VERSION,
            name: name.into(),
            key: key.into(),
            user_type: 0,
        }))
        .await;
    }

    async fn send(&mut self, packet: Packet) {
        self.writer.send(packet).await.expect("send");
    }

    async fn chat(&mut self, text: &str) {
        self.send(Packet::message(SELF_ID, text)).await;
    }

    async fn place(&mut self, position: BlockPos, block: u8) {
        self.send(Packet::SetBlockRequest {
            position,
            mode: BlockMode::Place,
            block,
        })
        .await;
    }

    /// Next packet, or `None` on EOF.
    async fn next(&mut self) -> Option<Packet> {
        timeout(RECV_TIMEOUT, self.reader.next())
            .await
            .expect("timed out waiting for a packet")
            .map(|item| item.expect("valid packet"))
    }

    async fn recv(&mut self) -> Packet {
        self.next().await.expect("connection closed")
    }

    async fn recv_until<F>(&mut self, mut wanted: F) -> Packet
    where
        F: FnMut(&Packet) -> bool,
    {
        loop {
            let packet = self.recv().await;
            if wanted(&packet) {
                return packet;
            }
        }
    }

    /// Asserts that nothing matching `unwanted` arrives for a while.
    async fn expect_none<F>(&mut self, mut unwanted: F)
    where
        F: FnMut(&Packet) -> bool,
    {
        let deadline = tokio::time::Instant::now() + QUIET_PERIOD;
        loop {
            match tokio::time::timeout_at(deadline, self.reader.next()).await {
                Err(_) => return,
                Ok(None) => return,
                Ok(Some(packet)) => {
                    let packet = packet.expect("valid packet");
                    assert!(!unwanted(&packet), "unexpected packet {:?}", packet);
                }
            }
        }
    }

    /// Reads until the server closes the connection, returning the
    /// disconnect reason if one was sent.
    async fn closed_with(&mut self) -> Option<String> {
        let mut reason = None;
        loop {
            match timeout(RECV_TIMEOUT, self.reader.next())
                .await
                .expect("timed out waiting for close")
            {
                Some(Ok(Packet::Disconnect { reason: r })) => reason = Some(r),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return reason,
            }
        }
    }
}

fn is_message_containing<'a>(needle: &'a str) -> impl FnMut(&Packet) -> bool + 'a {
    move |p| matches!(p, Packet::Message { text, .. } if text.contains(needle))
}

struct VetoEverything;

#[async_trait]
impl Plugin for VetoEverything {
    fn name(&self) -> &str {
        "veto_everything"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn on_set_block(
        &self,
        _ctx: &HookContext,
        _change: &BlockChange,
    ) -> Result<bool, PluginError> {
        Ok(true)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn login_sends_welcome_level_and_spawn_in_order() {
    let server = TestServer::start(config()).await;
    let mut alice = TestClient::connect(server.addr).await;
    alice.identify("Alice", "").await;

    assert_eq!(
        alice.recv().await,
        Packet::Identification(Identification {
            protocol_version: PROTOCOL_VERSION,
            name: "Test Server".into(),
            key: "Have fun".into(),
            user_type: 0,
        })
    );
    assert_eq!(alice.recv().await, Packet::LevelInitialize);

    let mut chunks = 0;
    let finalize = loop {
        match alice.recv().await {
            Packet::LevelDataChunk { .. } => chunks += 1,
            other => break other,
        }
    };
    assert!(chunks >= 1);
    assert_eq!(
        finalize,
        Packet::LevelFinalize {
            width: 16,
            height: 16,
            length: 16
        }
    );

    assert_eq!(
        alice.recv().await,
        Packet::SpawnPlayer {
            player_id: SELF_ID,
            name: "Alice".into(),
            location: Location::standing_on(BlockPos::new(8, 8, 8)),
        }
    );
    assert_eq!(
        alice.recv().await,
        Packet::message(SELF_ID, "&eAlice joined the game")
    );

    let session = server
        .server
        .handle()
        .sessions()
        .find_by_username("alice")
        .await
        .expect("session registered");
    assert_eq!(session.world, "main");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn players_see_each_other_spawn_move_and_leave() {
    let server = TestServer::start(config()).await;
    let mut alice = TestClient::login(server.addr, "Alice", "").await;
    let mut bob = TestClient::login(server.addr, "Bob", "").await;

    // Bob was told about Alice while joining; Alice is told about Bob.
    let spawned = alice
        .recv_until(|p| matches!(p, Packet::SpawnPlayer { .. }))
        .await;
    assert!(matches!(spawned, Packet::SpawnPlayer { player_id: 1, ref name, .. } if name == "Bob"));
    alice.recv_until(is_message_containing("Bob joined")).await;

    let moved = Location {
        x: 100,
        y: 200,
        z: 300,
        yaw: 64,
        pitch: 0,
    };
    bob.send(Packet::PositionUpdate {
        player_id: SELF_ID,
        location: moved,
    })
    .await;
    assert_eq!(
        alice
            .recv_until(|p| matches!(p, Packet::PositionUpdate { .. }))
            .await,
        Packet::PositionUpdate {
            player_id: 1,
            location: moved
        }
    );
    bob.expect_none(|p| matches!(p, Packet::PositionUpdate { .. }))
        .await;

    drop(bob);
    assert_eq!(
        alice
            .recv_until(|p| matches!(p, Packet::Despawn { .. }))
            .await,
        Packet::Despawn { player_id: 1 }
    );
    alice.recv_until(is_message_containing("Bob left the game")).await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_token_is_rejected_with_a_notice() {
    let mut cfg = config();
    cfg.auth = AuthConfig {
        online_mode: true,
        secret: Some("s3cret".into()),
    };
    let server = TestServer::start(cfg).await;

    let mut mallory = TestClient::connect(server.addr).await;
    mallory
        .identify("Mallory", "0123456789abcdef0123456789abcdef")
        .await;
    let reason = mallory.closed_with().await;
    assert_eq!(
        reason.as_deref(),
        Some("Login failed! Could not verify your name")
    );
    assert!(server
        .server
        .handle()
        .sessions()
        .find_by_username("Mallory")
        .await
        .is_none());

    let token = verification_token("s3cret", "Alice");
    let _alice = TestClient::login(server.addr, "Alice", &token).await;
    assert_eq!(server.server.handle().online_count().await, 1);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_name_is_rejected_and_first_session_survives() {
    let server = TestServer::start(config()).await;
    let mut alice = TestClient::login(server.addr, "Alice", "").await;

    let mut impostor = TestClient::connect(server.addr).await;
    impostor.identify("alice", "").await;
    assert_eq!(
        impostor.closed_with().await.as_deref(),
        Some("That name is already in use")
    );

    alice.chat("still here").await;
    alice.recv_until(is_message_containing("still here")).await;
    assert_eq!(server.server.handle().online_count().await, 1);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn block_change_is_stored_and_broadcast_to_peers_only() {
    let server = TestServer::start(config()).await;
    let mut alice = TestClient::login(server.addr, "Alice", "").await;
    let mut bob = TestClient::login(server.addr, "Bob", "").await;
    alice.recv_until(is_message_containing("Bob joined")).await;

    let pos = BlockPos::new(1, 2, 3);
    alice.place(pos, 4).await;
    assert_eq!(
        bob.recv_until(|p| matches!(p, Packet::SetBlock { .. })).await,
        Packet::SetBlock {
            position: pos,
            block: 4
        }
    );
    alice
        .expect_none(|p| matches!(p, Packet::SetBlock { .. }))
        .await;

    let world = server.server.handle().worlds().get("main").unwrap();
    assert_eq!(world.get_block(pos).await, Some(4));

    bob.send(Packet::SetBlockRequest {
        position: pos,
        mode: BlockMode::Destroy,
        block: 4,
    })
    .await;
    assert_eq!(
        alice
            .recv_until(|p| matches!(p, Packet::SetBlock { .. }))
            .await,
        Packet::SetBlock {
            position: pos,
            block: 0
        }
    );
    assert_eq!(world.get_block(pos).await, Some(0));
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn vetoed_change_is_corrected_for_the_requester_only() {
    let server = TestServer::start(config()).await;
    server
        .server
        .plugins()
        .register(Arc::new(VetoEverything))
        .await
        .unwrap();
    let mut alice = TestClient::login(server.addr, "Alice", "").await;
    let mut bob = TestClient::login(server.addr, "Bob", "").await;
    alice.recv_until(is_message_containing("Bob joined")).await;

    let pos = BlockPos::new(5, 5, 5);
    alice.place(pos, 7).await;
    assert_eq!(
        alice
            .recv_until(|p| matches!(p, Packet::SetBlock { .. }))
            .await,
        Packet::SetBlock {
            position: pos,
            block: 0
        }
    );
    bob.expect_none(|p| matches!(p, Packet::SetBlock { .. }))
        .await;

    let world = server.server.handle().worlds().get("main").unwrap();
    assert_eq!(world.get_block(pos).await, Some(0));
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_bounds_edits_are_ignored() {
    let server = TestServer::start(config()).await;
    let mut alice = TestClient::login(server.addr, "Alice", "").await;
    let mut bob = TestClient::login(server.addr, "Bob", "").await;
    alice.recv_until(is_message_containing("Bob joined")).await;

    alice.place(BlockPos::new(16, 0, 0), 1).await;
    alice.place(BlockPos::new(-1, 0, 0), 1).await;
    bob.expect_none(|p| matches!(p, Packet::SetBlock { .. }))
        .await;
    alice
        .expect_none(|p| matches!(p, Packet::SetBlock { .. }))
        .await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_and_broadcasts_stay_within_a_world() {
    let server = TestServer::start(config()).await;
    let mut alice = TestClient::login(server.addr, "Alice", "").await;
    let mut bob = TestClient::login(server.addr, "Bob", "").await;
    let mut carol = TestClient::login(server.addr, "Carol", "").await;

    carol.chat("/goto nether").await;
    carol
        .recv_until(|p| {
            matches!(
                p,
                Packet::LevelFinalize {
                    width: 8,
                    height: 8,
                    length: 8
                }
            )
        })
        .await;
    carol.recv_until(is_message_containing("arrived from main")).await;
    alice
        .recv_until(|p| matches!(p, Packet::Despawn { player_id: 2 }))
        .await;

    alice.chat("hello main").await;
    assert_eq!(
        bob.recv_until(is_message_containing("hello main")).await,
        Packet::message(0, "&7Alice: &fhello main")
    );
    carol.expect_none(is_message_containing("hello main")).await;

    let session = server
        .server
        .handle()
        .sessions()
        .find_by_username("carol")
        .await
        .unwrap();
    assert_eq!(session.world, "nether");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn long_chat_lines_are_split() {
    let server = TestServer::start(config()).await;
    let mut alice = TestClient::login(server.addr, "Alice", "").await;

    // 64 bytes is the whole message field, so send a line that fills it.
    let line = "a".repeat(60);
    alice.chat(&line).await;

    let first = alice.recv_until(is_message_containing("Alice:")).await;
    let second = alice.recv().await;
    match (first, second) {
        (Packet::Message { text: a, .. }, Packet::Message { text: b, .. }) => {
            assert_eq!(a.len(), 64);
            assert_eq!(format!("{a}{b}"), format!("&7Alice: &f{line}"));
        }
        other => panic!("expected two message chunks, got {:?}", other),
    }
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_commands_get_a_reply() {
    let server = TestServer::start(config()).await;
    let mut alice = TestClient::login(server.addr, "Alice", "").await;

    alice.chat("/fly").await;
    alice
        .recv_until(is_message_containing("Unknown command: /fly"))
        .await;

    alice.chat("/who").await;
    alice
        .recv_until(is_message_containing("Players in main (1): &fAlice"))
        .await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_stream_closes_the_connection() {
    let server = TestServer::start(config()).await;
    let alice = TestClient::login(server.addr, "Alice", "").await;

    let mut raw = alice.writer.into_inner();
    tokio::io::AsyncWriteExt::write_all(&mut raw, &[0xFF, 0x00, 0x00])
        .await
        .unwrap();

    let mut reader = alice.reader;
    let reason = loop {
        match timeout(RECV_TIMEOUT, reader.next()).await.expect("closed") {
            Some(Ok(Packet::Disconnect { reason })) => break Some(reason),
            Some(Ok(_)) => {}
            Some(Err(_)) | None => break None,
        }
    };
    assert!(reason.is_none() || reason.as_deref() == Some("Protocol error"));

    for _ in 0..100 {
        if server.server.handle().online_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.server.handle().online_count().await, 0);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn kick_and_shutdown_send_disconnect_notices() {
    let server = TestServer::start(config()).await;
    let mut alice = TestClient::login(server.addr, "Alice", "").await;
    let mut bob = TestClient::login(server.addr, "Bob", "").await;

    let handle = server.server.handle();
    let bob_session = handle.sessions().find_by_username("bob").await.unwrap();
    assert!(handle.kick(bob_session.connection_id(), "Be nice").await);
    assert_eq!(bob.closed_with().await.as_deref(), Some("Be nice"));
    alice.recv_until(is_message_containing("Bob left")).await;

    server.server.shutdown().await.unwrap();
    assert_eq!(
        alice.closed_with().await.as_deref(),
        Some("Server shutting down")
    );
    timeout(RECV_TIMEOUT, server.task).await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn worlds_are_saved_on_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.vxw");
    let mut cfg = config();
    cfg.worlds = vec![WorldConfig {
        path: Some(path.clone()),
        ..WorldConfig::new("main", 16, 16, 16)
    }];
    let server = TestServer::start(cfg).await;

    let mut alice = TestClient::login(server.addr, "Alice", "").await;
    alice.place(BlockPos::new(3, 3, 3), 9).await;
    // Round trip through chat so the edit is processed before leaving.
    alice.chat("done").await;
    alice.recv_until(is_message_containing("done")).await;
    drop(alice);

    for _ in 0..100 {
        if path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    server.stop().await;

    use voxel_server::world::{MemoryWorld, WorldStore};
    let saved = MemoryWorld::load(&path).unwrap();
    assert_eq!(saved.get_block(BlockPos::new(3, 3, 3)), Some(9));
}

#[tokio::test(flavor = "multi_thread")]
async fn peer_traffic_never_overtakes_the_level_transfer() {
    let mut cfg = config();
    cfg.worlds = vec![WorldConfig::new("main", 128, 64, 128)];
    let server = TestServer::start(cfg).await;

    let bob = TestClient::login(server.addr, "Bob", "").await;
    let TestClient {
        reader: _bob_reader,
        writer: mut bob_writer,
    } = bob;
    let wandering = tokio::spawn(async move {
        let mut step: i16 = 0;
        loop {
            step = (step + 1) % 256;
            let location = Location {
                x: 64 + step,
                y: 1200,
                z: 64,
                yaw: 0,
                pitch: 0,
            };
            let update = Packet::PositionUpdate {
                player_id: SELF_ID,
                location,
            };
            if bob_writer.send(update).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_micros(200)).await;
        }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.identify("Alice", "").await;
    assert!(matches!(alice.recv().await, Packet::Identification(_)));
    assert_eq!(alice.recv().await, Packet::LevelInitialize);

    let mut level_done = false;
    let mut spawned_self = false;
    loop {
        match alice.recv().await {
            Packet::LevelDataChunk { .. } => assert!(!level_done, "chunk after finalize"),
            Packet::LevelFinalize { .. } => level_done = true,
            Packet::SpawnPlayer { player_id, .. } if player_id == SELF_ID => {
                assert!(level_done, "spawned before the level was complete");
                spawned_self = true;
            }
            Packet::SpawnPlayer { player_id: 0, name, .. } => {
                assert!(spawned_self, "peer spawned before self");
                assert_eq!(name, "Bob");
                break;
            }
            other => panic!("world traffic during the level transfer: {other:?}"),
        }
    }
    // Bob's movement only flows once he has been introduced.
    assert!(matches!(
        alice
            .recv_until(|p| matches!(p, Packet::PositionUpdate { .. }))
            .await,
        Packet::PositionUpdate { player_id: 0, .. }
    ));

    wandering.abort();
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_clients_time_out_and_are_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.vxw");
    let mut cfg = config();
    cfg.connection_timeout = 1;
    cfg.worlds = vec![WorldConfig {
        path: Some(path.clone()),
        ..WorldConfig::new("main", 16, 16, 16)
    }];
    let server = TestServer::start(cfg).await;

    let mut alice = TestClient::login(server.addr, "Alice", "").await;
    let mut bob = TestClient::login(server.addr, "Bob", "").await;
    assert!(!path.exists());

    // Bob keeps talking so only Alice goes quiet for longer than the timeout.
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    let mut despawned = false;
    let mut farewell = false;
    while !(despawned && farewell) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "idle client was never dropped"
        );
        bob.send(Packet::PositionUpdate {
            player_id: SELF_ID,
            location: Location {
                x: 32,
                y: 64,
                z: 32,
                yaw: 0,
                pitch: 0,
            },
        })
        .await;
        if let Ok(Some(packet)) = timeout(Duration::from_millis(200), bob.reader.next()).await {
            match packet.expect("valid packet") {
                Packet::Despawn { player_id: 0 } => despawned = true,
                Packet::Message { text, .. } if text.contains("Alice left") => farewell = true,
                _ => {}
            }
        }
    }

    // No notice on a timeout; the socket just closes.
    assert_eq!(alice.closed_with().await, None);
    assert_eq!(server.server.handle().online_count().await, 1);
    assert!(path.exists(), "world saved when the idle client left");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_closes_connections_that_never_identified() {
    let server = TestServer::start(config()).await;
    let mut lurker = TestClient::connect(server.addr).await;

    for _ in 0..100 {
        if server.server.connection_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.server.connection_count(), 1);
    assert_eq!(server.server.handle().online_count().await, 0);

    server.server.shutdown().await.unwrap();
    assert_eq!(
        lurker.closed_with().await.as_deref(),
        Some("Server shutting down")
    );
    timeout(RECV_TIMEOUT, server.task).await.unwrap().unwrap();
    assert_eq!(server.server.connection_count(), 0);
}
