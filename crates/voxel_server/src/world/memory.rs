//! In-memory world with optional gzip persistence.
//!
//! Save file layout (gzip compressed, big-endian):
//!
//! ```text
//! [Magic "VXLW"(4)] [Version(1)] [Width(2)] [Height(2)] [Length(2)]
//! [SpawnX(2)] [SpawnY(2)] [SpawnZ(2)] [Blocks(width*height*length)]
//! ```

use super::{Dimensions, WorldStore, AIR};
use crate::error::WorldError;
use bytes::{Buf, BufMut, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use voxel_protocol::BlockPos;

const MAGIC: &[u8; 4] = b"VXLW";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 6 + 6;

/// A world held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryWorld {
    dimensions: Dimensions,
    spawn: BlockPos,
    blocks: Vec<u8>,
    path: Option<PathBuf>,
}

impl MemoryWorld {
    /// An all-air world with its spawn point in the middle.
    pub fn new(dimensions: Dimensions) -> Self {
        Self {
            dimensions,
            spawn: BlockPos::new(
                dimensions.width / 2,
                dimensions.height / 2,
                dimensions.length / 2,
            ),
            blocks: vec![AIR; dimensions.volume()],
            path: None,
        }
    }

    /// Saves to `path` from now on.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_spawn(mut self, spawn: BlockPos) -> Self {
        self.spawn = spawn;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Loads a world saved by [`WorldStore::save`]; later saves go back to `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorldError> {
        let path = path.as_ref();
        let mut raw = Vec::new();
        GzDecoder::new(File::open(path)?).read_to_end(&mut raw)?;

        if raw.len() < HEADER_LEN {
            return Err(WorldError::Corrupt(format!(
                "{} is too short for a world header",
                path.display()
            )));
        }
        let mut buf = &raw[..];
        if &buf[..4] != MAGIC {
            return Err(WorldError::Corrupt(format!("{} is not a world file", path.display())));
        }
        buf.advance(4);
        let version = buf.get_u8();
        if version != FORMAT_VERSION {
            return Err(WorldError::Corrupt(format!(
                "unsupported world format version {version}"
            )));
        }

        let dimensions = Dimensions::new(buf.get_i16(), buf.get_i16(), buf.get_i16())?;
        let spawn = BlockPos::new(buf.get_i16(), buf.get_i16(), buf.get_i16());
        if buf.remaining() != dimensions.volume() {
            return Err(WorldError::Corrupt(format!(
                "expected {} blocks, found {}",
                dimensions.volume(),
                buf.remaining()
            )));
        }

        debug!("Loaded {:?} world from {}", dimensions, path.display());
        Ok(Self {
            dimensions,
            spawn,
            blocks: buf.to_vec(),
            path: Some(path.to_path_buf()),
        })
    }

    fn write_to(&self, path: &Path) -> Result<(), WorldError> {
        let mut header = BytesMut::with_capacity(HEADER_LEN);
        header.put_slice(MAGIC);
        header.put_u8(FORMAT_VERSION);
        header.put_i16(self.dimensions.width);
        header.put_i16(self.dimensions.height);
        header.put_i16(self.dimensions.length);
        header.put_i16(self.spawn.x);
        header.put_i16(self.spawn.y);
        header.put_i16(self.spawn.z);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write next to the target and rename so a crash never leaves a torn file.
        let staging = path.with_extension("tmp");
        {
            let file = BufWriter::new(File::create(&staging)?);
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(&header)?;
            encoder.write_all(&self.blocks)?;
            encoder.finish()?.flush()?;
        }
        fs::rename(&staging, path)?;
        Ok(())
    }
}

impl WorldStore for MemoryWorld {
    fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    fn get_block(&self, pos: BlockPos) -> Option<u8> {
        self.dimensions.index(pos).map(|i| self.blocks[i])
    }

    fn set_block(&mut self, pos: BlockPos, block: u8) -> Result<(), WorldError> {
        let index = self.dimensions.index(pos).ok_or(WorldError::OutOfBounds {
            x: pos.x,
            y: pos.y,
            z: pos.z,
        })?;
        self.blocks[index] = block;
        Ok(())
    }

    fn spawn(&self) -> BlockPos {
        self.spawn
    }

    fn blocks(&self) -> &[u8] {
        &self.blocks
    }

    fn save(&self) -> Result<(), WorldError> {
        match &self.path {
            Some(path) => {
                self.write_to(path)?;
                debug!("Saved world to {}", path.display());
                Ok(())
            }
            None => Ok(()),
        }
    }
}
