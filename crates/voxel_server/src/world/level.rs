//! Level transfer encoding.
//!
//! A level is sent as the gzip of `[volume: i32 BE][blocks]`, split into
//! chunks of at most 1024 bytes, each tagged with a completion percentage.

use super::Dimensions;
use crate::error::WorldError;
use bytes::{BufMut, Bytes, BytesMut};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use voxel_protocol::packet::LEVEL_CHUNK_LEN;
use voxel_protocol::Packet;

/// A compressed level ready to be sent.
#[derive(Debug, Clone)]
pub struct LevelData {
    pub dimensions: Dimensions,
    pub compressed: Bytes,
}

impl LevelData {
    pub fn encode(dimensions: Dimensions, blocks: &[u8]) -> Result<Self, WorldError> {
        let volume = i32::try_from(blocks.len())
            .map_err(|_| WorldError::Corrupt(format!("{} blocks do not fit a level", blocks.len())))?;

        let mut encoder = GzEncoder::new(
            BytesMut::with_capacity(blocks.len() / 8 + 64).writer(),
            Compression::default(),
        );
        encoder.write_all(&volume.to_be_bytes())?;
        encoder.write_all(blocks)?;
        let compressed = encoder.finish()?.into_inner().freeze();

        Ok(Self {
            dimensions,
            compressed,
        })
    }

    /// The full transfer sequence: initialize, data chunks, finalize.
    pub fn packets(&self) -> Vec<Packet> {
        let total = self.compressed.len();
        let chunk_count = total.div_ceil(LEVEL_CHUNK_LEN).max(1);
        let mut packets = Vec::with_capacity(chunk_count + 2);
        packets.push(Packet::LevelInitialize);

        let mut sent = 0;
        while sent < total {
            let end = (sent + LEVEL_CHUNK_LEN).min(total);
            packets.push(Packet::LevelDataChunk {
                length: (end - sent) as i16,
                data: self.compressed.slice(sent..end),
                percent: (end * 100 / total) as u8,
            });
            sent = end;
        }

        packets.push(Packet::LevelFinalize {
            width: self.dimensions.width,
            height: self.dimensions.height,
            length: self.dimensions.length,
        });
        packets
    }
}
