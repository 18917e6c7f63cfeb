//! Outbound side of a client connection.

use super::ConnectionId;
use crate::error::ServerError;
use std::net::SocketAddr;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use voxel_protocol::Packet;

/// Cheaply clonable handle used to send packets to one client.
///
/// Packets are queued on a bounded channel and written by the connection's
/// writer task in queue order, so everything sent through one handle reaches
/// the client in the order it was sent.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    remote_addr: SocketAddr,
    connected_at: SystemTime,
    outbound: mpsc::Sender<Packet>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    /// Creates a handle and the receiving end its writer task drains.
    ///
    /// # Arguments
    ///
    /// * `id` - Server-unique connection id
    /// * `remote_addr` - Peer address, for logging
    /// * `capacity` - Outbound queue capacity (at least 1)
    pub fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Packet>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id,
            remote_addr,
            connected_at: SystemTime::now(),
            outbound,
            closed: CancellationToken::new(),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    /// Queues a packet without waiting.
    ///
    /// Fire-and-forget from the caller's point of view: a full queue or a
    /// closed connection is reported as an error but never blocks.
    pub fn send(&self, packet: Packet) -> Result<(), ServerError> {
        if self.closed.is_cancelled() {
            return Err(ServerError::Network(format!(
                "connection {} is closed",
                self.id
            )));
        }
        self.outbound.try_send(packet).map_err(|e| match e {
            mpsc::error::TrySendError::Full(packet) => {
                warn!(
                    "📪 Outbound queue full for connection {}, dropping {:?}",
                    self.id,
                    packet.kind()
                );
                ServerError::Network(format!("outbound queue full for connection {}", self.id))
            }
            mpsc::error::TrySendError::Closed(_) => {
                ServerError::Network(format!("connection {} is closed", self.id))
            }
        })
    }

    /// Queues a packet, waiting for queue space.
    ///
    /// Used for bulk transfers (level data) where dropping packets would
    /// leave the client in a broken state.
    pub async fn send_async(&self, packet: Packet) -> Result<(), ServerError> {
        if self.closed.is_cancelled() {
            return Err(ServerError::Network(format!(
                "connection {} is closed",
                self.id
            )));
        }
        self.outbound
            .send(packet)
            .await
            .map_err(|_| ServerError::Network(format!("connection {} is closed", self.id)))
    }

    /// Signals the reader and writer of this connection to stop.
    ///
    /// Packets already queued are still flushed by the writer.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!("Closing connection {}", self.id);
            self.closed.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}
