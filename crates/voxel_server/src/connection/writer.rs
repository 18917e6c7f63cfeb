use super::ConnectionHandle;
use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};
use voxel_protocol::{Packet, PacketCodec};

/// Drains a connection's outbound queue into its socket.
///
/// Stops after writing a disconnect notice, when every handle is dropped, on
/// a write error, or once the connection is closed (after flushing whatever
/// was already queued). Always leaves the handle closed.
pub(crate) async fn write_loop<W>(
    writer: W,
    mut outbound: mpsc::Receiver<Packet>,
    handle: ConnectionHandle,
) where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, PacketCodec::server());

    loop {
        tokio::select! {
            biased;
            next = outbound.recv() => {
                let Some(packet) = next else { break };
                let is_disconnect = matches!(packet, Packet::Disconnect { .. });
                if let Err(e) = sink.send(packet).await {
                    warn!("Write to connection {} failed: {}", handle.id(), e);
                    break;
                }
                if is_disconnect {
                    break;
                }
            }
            _ = handle.closed() => {
                while let Ok(packet) = outbound.try_recv() {
                    let is_disconnect = matches!(packet, Packet::Disconnect { .. });
                    if sink.feed(packet).await.is_err() || is_disconnect {
                        break;
                    }
                }
                break;
            }
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Closing writer for connection {}: {}", handle.id(), e);
    }
    handle.close();
}
