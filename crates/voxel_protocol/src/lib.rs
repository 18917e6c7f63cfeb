//! # Voxel Protocol
//!
//! Wire-level building blocks of the voxel session server: stream framing,
//! the typed packet model and the binary codec.
//!
//! ## Components
//!
//! * **[`FrameReader`]** - Reassembles complete packets from arbitrary reads
//! * **[`Packet`]** - Tagged union of every packet kind
//! * **[`codec`]** - `decode`/`encode` plus a tokio [`PacketCodec`]
//! * **[`text`]** - Sanitising and chunking of fixed-width text fields
//!
//! ## Wire Format
//!
//! ```text
//! [Kind(1)] [Fixed fields ...]
//! ```
//!
//! The kind byte selects an entry in a static length table; there is no
//! other framing. Strings are 64-byte, space padded ASCII fields.
//!
//! ## Example
//!
//! ```rust
//! use voxel_protocol::{codec, FrameReader, Packet};
//!
//! let bytes = codec::encode_to_bytes(&Packet::message(-1, "hello")).unwrap();
//! let mut reader = FrameReader::serverbound();
//!
//! // Half a packet yields nothing, the rest completes it.
//! assert_eq!(reader.feed(&bytes[..10]).count(), 0);
//! let frames: Vec<_> = reader.feed(&bytes[10..]).collect();
//! assert_eq!(frames.len(), 1);
//! ```

pub mod codec;
pub mod error;
pub mod frame;
pub mod packet;
pub mod text;

pub use codec::{decode, decode_frame, encode, encode_to_bytes, PacketCodec};
pub use error::{FramingError, ProtocolError};
pub use frame::{FrameReader, Frames};
pub use packet::{
    BlockMode, BlockPos, Direction, Identification, Location, Packet, PacketKind,
    MAX_FRAME_LEN, OPERATOR_USER_TYPE, PLAYER_USER_TYPE, PROTOCOL_VERSION, SELF_ID, STRING_LEN,
};
