//! Packet kinds, the static length table and the typed packet model.
//!
//! Every packet starts with a single kind byte. The kind alone determines the
//! total packet size, so there is no length prefix on the wire:
//!
//! ```text
//! [Kind(1)] [Fixed fields ...]
//! ```
//!
//! Multi-byte integers are big-endian and strings occupy a fixed 64-byte
//! field padded with spaces.

use bytes::Bytes;

/// Protocol version spoken by this server.
pub const PROTOCOL_VERSION: u8 = 7;

/// Width of every string field on the wire.
pub const STRING_LEN: usize = 64;

/// Payload width of a single level data chunk.
pub const LEVEL_CHUNK_LEN: usize = 1024;

/// Largest frame in the length table, the level data chunk.
pub const MAX_FRAME_LEN: usize = 1028;

/// Player id a client uses to refer to itself.
pub const SELF_ID: i8 = -1;

/// User type sent to operators in the identification acknowledgment.
pub const OPERATOR_USER_TYPE: u8 = 0x64;

/// User type sent to regular players.
pub const PLAYER_USER_TYPE: u8 = 0x00;

/// The direction a packet travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server.
    Serverbound,
    /// Server to client.
    Clientbound,
}

/// Discriminator byte of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Identification = 0x00,
    Ping = 0x01,
    LevelInitialize = 0x02,
    LevelDataChunk = 0x03,
    LevelFinalize = 0x04,
    SetBlockRequest = 0x05,
    SetBlock = 0x06,
    SpawnPlayer = 0x07,
    PositionUpdate = 0x08,
    Despawn = 0x0c,
    Message = 0x0d,
    Disconnect = 0x0e,
    UpdateUserType = 0x0f,
}

impl PacketKind {
    /// Resolves a kind byte for the given direction.
    ///
    /// Returns `None` for bytes that are not a kind at all and for kinds that
    /// never travel in `direction`; both are protocol errors for the reader.
    pub fn from_byte(byte: u8, direction: Direction) -> Option<Self> {
        let kind = match byte {
            0x00 => Self::Identification,
            0x01 => Self::Ping,
            0x02 => Self::LevelInitialize,
            0x03 => Self::LevelDataChunk,
            0x04 => Self::LevelFinalize,
            0x05 => Self::SetBlockRequest,
            0x06 => Self::SetBlock,
            0x07 => Self::SpawnPlayer,
            0x08 => Self::PositionUpdate,
            0x0c => Self::Despawn,
            0x0d => Self::Message,
            0x0e => Self::Disconnect,
            0x0f => Self::UpdateUserType,
            _ => return None,
        };
        kind.travels(direction).then_some(kind)
    }

    /// Total wire length of this kind, kind byte included.
    ///
    /// Movement is 10 bytes and set-block 9, the layout Classic v7 clients
    /// send, not the 9/10 pair some protocol tables list.
    pub const fn wire_len(self) -> usize {
        match self {
            Self::Identification => 131,
            Self::Ping => 1,
            Self::LevelInitialize => 1,
            Self::LevelDataChunk => 1028,
            Self::LevelFinalize => 7,
            Self::SetBlockRequest => 9,
            Self::SetBlock => 8,
            Self::SpawnPlayer => 74,
            Self::PositionUpdate => 10,
            Self::Despawn => 2,
            Self::Message => 66,
            Self::Disconnect => 65,
            Self::UpdateUserType => 2,
        }
    }

    /// Whether this kind is ever sent in `direction`.
    pub const fn travels(self, direction: Direction) -> bool {
        match direction {
            Direction::Serverbound => matches!(
                self,
                Self::Identification | Self::SetBlockRequest | Self::PositionUpdate | Self::Message
            ),
            Direction::Clientbound => !matches!(self, Self::SetBlockRequest),
        }
    }

    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A block coordinate inside a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockPos {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl BlockPos {
    pub const fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }
}

/// A player location in fixed-point units (32 units per block) plus rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub yaw: u8,
    pub pitch: u8,
}

impl Location {
    /// Fixed-point units per block.
    pub const UNITS_PER_BLOCK: i16 = 32;

    /// Standing location for a player whose feet are on `pos`.
    ///
    /// Centres the player on the block and lifts the reference point to eye
    /// height, which is where clients report their own position from.
    pub fn standing_on(pos: BlockPos) -> Self {
        Self {
            x: pos.x.saturating_mul(Self::UNITS_PER_BLOCK).saturating_add(16),
            y: pos.y.saturating_mul(Self::UNITS_PER_BLOCK).saturating_add(51),
            z: pos.z.saturating_mul(Self::UNITS_PER_BLOCK).saturating_add(16),
            yaw: 0,
            pitch: 0,
        }
    }

    /// The block this location falls into.
    pub fn block(&self) -> BlockPos {
        BlockPos {
            x: self.x.div_euclid(Self::UNITS_PER_BLOCK),
            y: self.y.div_euclid(Self::UNITS_PER_BLOCK),
            z: self.z.div_euclid(Self::UNITS_PER_BLOCK),
        }
    }
}

/// What a set-block request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockMode {
    Destroy,
    Place,
}

impl BlockMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Destroy),
            0x01 => Some(Self::Place),
            _ => None,
        }
    }

    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Destroy => 0x00,
            Self::Place => 0x01,
        }
    }
}

/// Identification packet, shared by both directions.
///
/// From a client, `name` is the username and `key` the verification token.
/// From the server, `name` is the server name and `key` the message of the
/// day; `user_type` tells the client whether it is an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    pub protocol_version: u8,
    pub name: String,
    pub key: String,
    pub user_type: u8,
}

/// A decoded packet. Produced by decode, consumed by a single dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Identification(Identification),
    Ping,
    LevelInitialize,
    LevelDataChunk {
        length: i16,
        data: Bytes,
        percent: u8,
    },
    LevelFinalize {
        width: i16,
        height: i16,
        length: i16,
    },
    SetBlockRequest {
        position: BlockPos,
        mode: BlockMode,
        block: u8,
    },
    SetBlock {
        position: BlockPos,
        block: u8,
    },
    SpawnPlayer {
        player_id: i8,
        name: String,
        location: Location,
    },
    PositionUpdate {
        player_id: i8,
        location: Location,
    },
    Despawn {
        player_id: i8,
    },
    Message {
        player_id: i8,
        text: String,
    },
    Disconnect {
        reason: String,
    },
    UpdateUserType {
        user_type: u8,
    },
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Identification(_) => PacketKind::Identification,
            Self::Ping => PacketKind::Ping,
            Self::LevelInitialize => PacketKind::LevelInitialize,
            Self::LevelDataChunk { .. } => PacketKind::LevelDataChunk,
            Self::LevelFinalize { .. } => PacketKind::LevelFinalize,
            Self::SetBlockRequest { .. } => PacketKind::SetBlockRequest,
            Self::SetBlock { .. } => PacketKind::SetBlock,
            Self::SpawnPlayer { .. } => PacketKind::SpawnPlayer,
            Self::PositionUpdate { .. } => PacketKind::PositionUpdate,
            Self::Despawn { .. } => PacketKind::Despawn,
            Self::Message { .. } => PacketKind::Message,
            Self::Disconnect { .. } => PacketKind::Disconnect,
            Self::UpdateUserType { .. } => PacketKind::UpdateUserType,
        }
    }

    /// Convenience constructor for a disconnect notice.
    pub fn disconnect(reason: impl Into<String>) -> Self {
        Self::Disconnect {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for a chat line.
    pub fn message(player_id: i8, text: impl Into<String>) -> Self {
        Self::Message {
            player_id,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_table_matches_the_wire_protocol() {
        assert_eq!(PacketKind::Identification.wire_len(), 131);
        assert_eq!(PacketKind::Message.wire_len(), 66);
        assert_eq!(PacketKind::SetBlockRequest.wire_len(), 9);
        assert_eq!(PacketKind::PositionUpdate.wire_len(), 10);
        assert_eq!(PacketKind::Disconnect.wire_len(), 65);
    }

    #[test]
    fn no_kind_outgrows_the_frame_buffer() {
        let longest = (0u8..=0xff)
            .flat_map(|b| {
                [Direction::Serverbound, Direction::Clientbound]
                    .into_iter()
                    .filter_map(move |direction| PacketKind::from_byte(b, direction))
            })
            .map(PacketKind::wire_len)
            .max();
        assert_eq!(longest, Some(MAX_FRAME_LEN));
    }

    #[test]
    fn serverbound_accepts_only_client_kinds() {
        let accepted: Vec<u8> = (0u8..=0xff)
            .filter(|b| PacketKind::from_byte(*b, Direction::Serverbound).is_some())
            .collect();
        assert_eq!(accepted, vec![0x00, 0x05, 0x08, 0x0d]);
    }

    #[test]
    fn clientbound_rejects_set_block_requests() {
        assert!(PacketKind::from_byte(0x05, Direction::Clientbound).is_none());
        assert_eq!(
            PacketKind::from_byte(0x06, Direction::Clientbound),
            Some(PacketKind::SetBlock)
        );
        assert!(PacketKind::from_byte(0x42, Direction::Clientbound).is_none());
    }

    #[test]
    fn standing_location_round_trips_to_the_block_above() {
        let spawn = BlockPos::new(64, 33, 64);
        let location = Location::standing_on(spawn);
        assert_eq!(location.x, 64 * 32 + 16);
        assert_eq!(location.block(), BlockPos::new(64, 34, 64));
    }
}
