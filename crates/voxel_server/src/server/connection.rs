//! Per-connection task.
//!
//! Inbound packets of one connection are handled strictly one after another,
//! in arrival order. A connection goes through these phases:
//!
//! ```text
//! Connecting --identification--> Authenticating --ok--> Active
//!      |                               |                  |
//!      +--------------- EOF / error / rejection / kick ---+--> Disconnecting
//! ```

use super::handle::ServerHandle;
use crate::auth::AuthHandshake;
use crate::connection::writer::write_loop;
use crate::connection::ConnectionHandle;
use crate::error::{AuthError, ServerError};
use crate::hooks::{BlockChange, CommandInvocation, HookContext, HookEvent, HookPipeline};
use crate::session::{PendingSession, Role, Session};
use crate::world::{AIR, MAX_BLOCK_ID};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use voxel_protocol::{
    codec, BlockMode, BlockPos, Direction, FrameReader, Identification, Location, Packet,
};

const READ_BUFFER_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionPhase {
    Connecting,
    Authenticating,
    Active,
    Disconnecting,
}

/// Serves one client until it disconnects.
///
/// `handle` and `outbound` are the two ends of the connection's queue; the
/// accept loop creates them so it can close connections that never log in.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    handle: ConnectionHandle,
    outbound: mpsc::Receiver<Packet>,
    server: ServerHandle,
    hooks: Arc<HookPipeline>,
) -> Result<(), ServerError> {
    let id = handle.id();
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", handle.remote_addr(), e);
    }
    let (reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(write_loop(writer, outbound, handle.clone()));

    let mut connection = Connection::new(server, hooks, handle.clone());
    let result = connection.run(reader).await;
    connection.disconnect(&result).await;

    handle.close();
    if let Err(e) = writer_task.await {
        error!("Writer task for connection {} failed: {}", id, e);
    }
    result
}

struct Connection {
    server: ServerHandle,
    hooks: Arc<HookPipeline>,
    handle: ConnectionHandle,
    auth: AuthHandshake,
    phase: ConnectionPhase,
}

impl Connection {
    fn new(server: ServerHandle, hooks: Arc<HookPipeline>, handle: ConnectionHandle) -> Self {
        let auth = AuthHandshake::new(&server.config().auth);
        Self {
            server,
            hooks,
            handle,
            auth,
            phase: ConnectionPhase::Connecting,
        }
    }

    /// Reads and dispatches until EOF, an error or the connection is closed.
    async fn run<R>(&mut self, mut reader: R) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin,
    {
        let timeout = match self.server.config().connection_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let mut frames = FrameReader::serverbound();
        let mut buf = vec![0u8; READ_BUFFER_LEN];

        loop {
            let read = tokio::select! {
                _ = self.handle.closed() => return Ok(()),
                read = read_with_timeout(&mut reader, &mut buf, timeout) => read?,
            };
            if read == 0 {
                debug!("Connection {} reached EOF", self.handle.id());
                return Ok(());
            }

            for frame in frames.feed(&buf[..read]) {
                let packet = codec::decode_frame(&frame?, Direction::Serverbound)?;
                self.dispatch(packet).await?;
                if self.phase == ConnectionPhase::Disconnecting {
                    return Ok(());
                }
            }
        }
    }

    async fn dispatch(&mut self, packet: Packet) -> Result<(), ServerError> {
        match (self.phase, packet) {
            (ConnectionPhase::Connecting, Packet::Identification(ident)) => {
                self.authenticate(ident).await
            }
            (ConnectionPhase::Active, Packet::Identification(_)) => {
                debug!("Ignoring repeated identification on {}", self.handle.id());
                Ok(())
            }
            (ConnectionPhase::Active, Packet::PositionUpdate { location, .. }) => {
                self.on_position(location).await
            }
            (ConnectionPhase::Active, Packet::Message { text, .. }) => self.on_chat(&text).await,
            (
                ConnectionPhase::Active,
                Packet::SetBlockRequest {
                    position,
                    mode,
                    block,
                },
            ) => self.on_set_block(position, mode, block).await,
            (phase, packet) => {
                debug!(
                    "Ignoring {:?} from connection {} in phase {:?}",
                    packet.kind(),
                    self.handle.id(),
                    phase
                );
                Ok(())
            }
        }
    }

    async fn authenticate(&mut self, ident: Identification) -> Result<(), ServerError> {
        self.phase = ConnectionPhase::Authenticating;
        match self.register(&ident).await {
            Ok(session) => {
                self.auth.accept();
                self.phase = ConnectionPhase::Active;
                info!(
                    "🎮 {} logged in from {} as player {}",
                    session.username,
                    self.handle.remote_addr(),
                    session.player_id
                );
                let greeting = format!("&e{} joined the game", session.username);
                let world = self.server.worlds().get(&session.world).ok_or_else(|| {
                    ServerError::Internal(format!("world {} vanished", session.world))
                })?;
                self.server.welcome(&session).await?;
                self.server.enter_world(&session, &world, &greeting).await
            }
            Err(ServerError::Auth(reason)) => {
                info!(
                    "🚫 Rejected identification from {}: {}",
                    self.handle.remote_addr(),
                    reason
                );
                let _ = self
                    .handle
                    .send_async(Packet::disconnect(reason.disconnect_reason()))
                    .await;
                self.phase = ConnectionPhase::Disconnecting;
                Err(ServerError::Auth(reason))
            }
            Err(e) => {
                self.phase = ConnectionPhase::Disconnecting;
                Err(e)
            }
        }
    }

    /// Validates the identification and registers the session.
    async fn register(&mut self, ident: &Identification) -> Result<Session, ServerError> {
        self.auth.check_identification(ident)?;

        let sessions = self.server.sessions();
        if sessions.find_by_username(&ident.name).await.is_some() {
            return self
                .auth
                .reject(AuthError::DuplicateName(ident.name.clone()))
                .map_err(ServerError::from);
        }
        self.auth.verify(&ident.name, &ident.key)?;

        let world = self.server.worlds().default_world()?;
        let role = if self.server.config().is_operator(&ident.name) {
            Role::Operator
        } else {
            Role::Player
        };
        let pending = PendingSession {
            connection: self.handle.clone(),
            username: ident.name.clone(),
            world: world.name().to_string(),
            location: Location::standing_on(world.spawn().await),
            role,
        };
        match sessions.add(pending).await {
            Ok(session) => Ok(session),
            Err(e) => self.auth.reject(e).map_err(ServerError::from),
        }
    }

    /// The registered session for this connection.
    async fn session(&self) -> Result<Session, ServerError> {
        self.server
            .sessions()
            .find_by_connection(self.handle.id())
            .await
            .ok_or_else(|| {
                ServerError::Internal(format!("no session for connection {}", self.handle.id()))
            })
    }

    async fn on_position(&mut self, location: Location) -> Result<(), ServerError> {
        let Some(session) = self
            .server
            .sessions()
            .update_location(self.handle.id(), location)
            .await
        else {
            return Ok(());
        };
        self.server
            .router()
            .broadcast_to_world(
                &session.world,
                |_| Packet::PositionUpdate {
                    player_id: session.player_id,
                    location,
                },
                Some(session.connection_id()),
            )
            .await;
        Ok(())
    }

    async fn on_chat(&mut self, text: &str) -> Result<(), ServerError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let session = self.session().await?;

        if text.starts_with('/') {
            let Some(invocation) = CommandInvocation::parse(text) else {
                self.server.send_text(&self.handle, "&cUnknown command");
                return Ok(());
            };
            info!("💬 {} issued /{}", session.username, invocation.command);
            let ctx = HookContext::new(session, self.server.clone());
            let result = self
                .hooks
                .dispatch(HookEvent::Command {
                    ctx: &ctx,
                    invocation: &invocation,
                })
                .await;
            if result.invoked == 0 {
                ctx.reply(&format!("&cUnknown command: /{}", invocation.command));
            }
            return Ok(());
        }

        info!("💬 <{}> {}", session.username, text);
        self.server
            .router()
            .broadcast_chat(&session.world, session.player_id, &session.chat_line(text))
            .await;
        Ok(())
    }

    async fn on_set_block(
        &mut self,
        position: BlockPos,
        mode: BlockMode,
        block: u8,
    ) -> Result<(), ServerError> {
        let session = self.session().await?;
        let Some(world) = self.server.worlds().get(&session.world) else {
            return Ok(());
        };
        let Some(current) = world.get_block(position).await else {
            debug!(
                "{} tried to edit {:?} outside {}",
                session.username, position, session.world
            );
            return Ok(());
        };

        let replacement = match mode {
            BlockMode::Destroy => AIR,
            BlockMode::Place => block,
        };
        if replacement > MAX_BLOCK_ID {
            debug!("{} sent invalid block id {}", session.username, block);
            self.correct(position, current);
            return Ok(());
        }

        let change = BlockChange {
            world: session.world.clone(),
            position,
            mode,
            block,
        };
        let ctx = HookContext::new(session, self.server.clone());
        let verdict = self
            .hooks
            .dispatch(HookEvent::SetBlock {
                ctx: &ctx,
                change: &change,
            })
            .await;

        if verdict.is_vetoed() {
            // Re-read: the block may have changed while the hooks ran.
            let stored = world.get_block(position).await.unwrap_or(current);
            self.correct(position, stored);
            return Ok(());
        }

        world.set_block(position, replacement).await?;
        self.server
            .router()
            .broadcast_to_world(
                &change.world,
                |_| Packet::SetBlock {
                    position,
                    block: replacement,
                },
                Some(self.handle.id()),
            )
            .await;
        Ok(())
    }

    /// Tells the requester what is really stored at `position`.
    fn correct(&self, position: BlockPos, block: u8) {
        if let Err(e) = self.handle.send(Packet::SetBlock { position, block }) {
            warn!("Could not send block correction to {}: {}", self.handle.id(), e);
        }
    }

    /// Cleans up after the read loop ends. Safe to reach more than once.
    async fn disconnect(&mut self, result: &Result<(), ServerError>) {
        let addr = self.handle.remote_addr();
        match result {
            Ok(()) => debug!("Connection {} from {} closed", self.handle.id(), addr),
            Err(ServerError::Auth(_)) => {}
            Err(ServerError::Framing(e)) => {
                warn!("⚠️ Protocol error from {}: {}", addr, e);
                let _ = self.handle.send(Packet::disconnect("Protocol error"));
            }
            Err(ServerError::Transport(e)) => {
                error!("❌ Transport error on connection from {}: {}", addr, e)
            }
            Err(e) => error!("❌ Connection error from {}: {}", addr, e),
        }
        self.phase = ConnectionPhase::Disconnecting;

        if let Some(session) = self.server.sessions().remove(self.handle.id()).await {
            info!("👋 {} disconnected", session.username);
            self.server
                .leave_world(&session, &format!("&e{} left the game", session.username))
                .await;
        }
    }
}

async fn read_with_timeout<R>(
    reader: &mut R,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<usize, ServerError>
where
    R: AsyncRead + Unpin,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, reader.read(buf))
            .await
            .map_err(|_| {
                ServerError::Transport(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "read timed out",
                ))
            })?
            .map_err(ServerError::from),
        None => reader.read(buf).await.map_err(ServerError::from),
    }
}
