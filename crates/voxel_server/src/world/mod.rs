//! Block storage for hosted worlds.
//!
//! [`WorldStore`] is the synchronous storage seam; [`World`] wraps one store
//! behind its own async lock so block changes in different worlds never
//! contend, and [`Worlds`] is the server-wide collection keyed by name.

pub mod level;
pub mod memory;

pub use memory::MemoryWorld;

use crate::config::WorldConfig;
use crate::error::WorldError;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};
use voxel_protocol::BlockPos;

/// Block id of empty space.
pub const AIR: u8 = 0;

/// Highest block id clients may place.
pub const MAX_BLOCK_ID: u8 = 49;

/// Size of a world in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: i16,
    pub height: i16,
    pub length: i16,
}

impl Dimensions {
    pub fn new(width: i16, height: i16, length: i16) -> Result<Self, WorldError> {
        if width <= 0 || height <= 0 || length <= 0 {
            return Err(WorldError::InvalidDimensions {
                width,
                height,
                length,
            });
        }
        Ok(Self {
            width,
            height,
            length,
        })
    }

    pub fn volume(&self) -> usize {
        self.width as usize * self.height as usize * self.length as usize
    }

    pub fn contains(&self, pos: BlockPos) -> bool {
        (0..self.width).contains(&pos.x)
            && (0..self.height).contains(&pos.y)
            && (0..self.length).contains(&pos.z)
    }

    /// Index of `pos` in the y-major block array (x varies fastest).
    pub fn index(&self, pos: BlockPos) -> Option<usize> {
        if !self.contains(pos) {
            return None;
        }
        let (x, y, z) = (pos.x as usize, pos.y as usize, pos.z as usize);
        Some((y * self.length as usize + z) * self.width as usize + x)
    }
}

/// Synchronous block storage for a single world.
pub trait WorldStore: Send + Sync {
    fn dimensions(&self) -> Dimensions;

    /// The block at `pos`, or `None` when `pos` is outside the world.
    fn get_block(&self, pos: BlockPos) -> Option<u8>;

    fn set_block(&mut self, pos: BlockPos, block: u8) -> Result<(), WorldError>;

    /// Where new arrivals stand.
    fn spawn(&self) -> BlockPos;

    /// Every block in y-major order, as sent during level transfer.
    fn blocks(&self) -> &[u8];

    /// Persists the world. Stores without a backing file do nothing.
    fn save(&self) -> Result<(), WorldError>;
}

/// A named world behind its own lock.
pub struct World {
    name: String,
    store: Arc<RwLock<Box<dyn WorldStore>>>,
    save_lock: Mutex<()>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World").field("name", &self.name).finish()
    }
}

impl World {
    pub fn new(name: impl Into<String>, store: impl WorldStore + 'static) -> Self {
        let store: Box<dyn WorldStore> = Box::new(store);
        Self {
            name: name.into(),
            store: Arc::new(RwLock::new(store)),
            save_lock: Mutex::new(()),
        }
    }

    /// Opens the world described by `config`, loading its save file when one
    /// exists and creating an empty world otherwise.
    pub fn open(config: &WorldConfig) -> Result<Self, WorldError> {
        let store = match &config.path {
            Some(path) if path.exists() => {
                info!("🗺️ Loading world {} from {}", config.name, path.display());
                MemoryWorld::load(path)?
            }
            Some(path) => {
                let dimensions = Dimensions::new(config.width, config.height, config.length)?;
                MemoryWorld::new(dimensions).with_path(path.clone())
            }
            None => MemoryWorld::new(Dimensions::new(
                config.width,
                config.height,
                config.length,
            )?),
        };
        Ok(Self::new(config.name.clone(), store))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn dimensions(&self) -> Dimensions {
        self.store.read().await.dimensions()
    }

    pub async fn spawn(&self) -> BlockPos {
        self.store.read().await.spawn()
    }

    pub async fn get_block(&self, pos: BlockPos) -> Option<u8> {
        self.store.read().await.get_block(pos)
    }

    /// Sets a block, returning the block it replaced.
    pub async fn set_block(&self, pos: BlockPos, block: u8) -> Result<u8, WorldError> {
        let mut store = self.store.write().await;
        let previous = store.get_block(pos).ok_or(WorldError::OutOfBounds {
            x: pos.x,
            y: pos.y,
            z: pos.z,
        })?;
        store.set_block(pos, block)?;
        Ok(previous)
    }

    /// Persists the world off the async runtime.
    pub async fn save(&self) -> Result<(), WorldError> {
        let _saving = self.save_lock.lock().await;
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.blocking_read().save())
            .await
            .map_err(|e| WorldError::Task(e.to_string()))?
    }

    /// Compresses the current blocks into level transfer chunks.
    pub async fn level_data(&self) -> Result<level::LevelData, WorldError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let store = store.blocking_read();
            level::LevelData::encode(store.dimensions(), store.blocks())
        })
        .await
        .map_err(|e| WorldError::Task(e.to_string()))?
    }
}

/// Every world hosted by the server.
#[derive(Debug)]
pub struct Worlds {
    worlds: DashMap<String, Arc<World>>,
    default_world: String,
}

impl Worlds {
    pub fn new(default_world: impl Into<String>) -> Self {
        Self {
            worlds: DashMap::new(),
            default_world: default_world.into(),
        }
    }

    /// Opens every configured world.
    pub fn open_all(default_world: &str, configs: &[WorldConfig]) -> Result<Self, WorldError> {
        let worlds = Self::new(default_world);
        for config in configs {
            worlds.insert(World::open(config)?);
        }
        if worlds.get(default_world).is_none() {
            return Err(WorldError::NotFound(default_world.to_string()));
        }
        Ok(worlds)
    }

    pub fn insert(&self, world: World) -> Arc<World> {
        let world = Arc::new(world);
        self.worlds.insert(world.name().to_string(), world.clone());
        world
    }

    pub fn get(&self, name: &str) -> Option<Arc<World>> {
        self.worlds.get(name).map(|entry| entry.value().clone())
    }

    pub fn default_name(&self) -> &str {
        &self.default_world
    }

    pub fn default_world(&self) -> Result<Arc<World>, WorldError> {
        self.get(&self.default_world)
            .ok_or_else(|| WorldError::NotFound(self.default_world.clone()))
    }

    /// World names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.worlds.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Saves every world, logging failures. Returns how many saves failed.
    pub async fn save_all(&self) -> usize {
        let worlds: Vec<Arc<World>> = self.worlds.iter().map(|e| e.value().clone()).collect();
        let mut failures = 0;
        for world in worlds {
            if let Err(e) = world.save().await {
                error!("❌ Failed to save world {}: {}", world.name(), e);
                failures += 1;
            }
        }
        failures
    }
}
