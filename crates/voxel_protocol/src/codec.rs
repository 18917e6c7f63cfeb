//! Packet encoding and decoding.
//!
//! [`decode`] turns one complete frame (as yielded by the
//! [`FrameReader`](crate::frame::FrameReader)) into a typed [`Packet`] and
//! [`encode`] does the reverse. [`PacketCodec`] wraps both for use with
//! `tokio_util::codec::{FramedRead, FramedWrite}`.

use crate::error::{FramingError, ProtocolError};
use crate::frame::next_frame;
use crate::packet::{
    BlockMode, BlockPos, Direction, Identification, Location, Packet, PacketKind,
    LEVEL_CHUNK_LEN, STRING_LEN,
};
use crate::text::sanitize;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Cursor over a single frame. Never reads past the end of the slice.
struct FieldReader<'a> {
    kind: PacketKind,
    data: &'a [u8],
}

impl<'a> FieldReader<'a> {
    fn new(kind: PacketKind, data: &'a [u8]) -> Self {
        Self { kind, data }
    }

    fn truncated(&self, field: &'static str) -> FramingError {
        FramingError::Truncated {
            kind: self.kind,
            field,
        }
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, FramingError> {
        if self.data.remaining() < 1 {
            return Err(self.truncated(field));
        }
        Ok(self.data.get_u8())
    }

    fn i8(&mut self, field: &'static str) -> Result<i8, FramingError> {
        if self.data.remaining() < 1 {
            return Err(self.truncated(field));
        }
        Ok(self.data.get_i8())
    }

    fn i16(&mut self, field: &'static str) -> Result<i16, FramingError> {
        if self.data.remaining() < 2 {
            return Err(self.truncated(field));
        }
        Ok(self.data.get_i16())
    }

    fn block_pos(&mut self) -> Result<BlockPos, FramingError> {
        Ok(BlockPos {
            x: self.i16("x")?,
            y: self.i16("y")?,
            z: self.i16("z")?,
        })
    }

    fn location(&mut self) -> Result<Location, FramingError> {
        Ok(Location {
            x: self.i16("x")?,
            y: self.i16("y")?,
            z: self.i16("z")?,
            yaw: self.u8("yaw")?,
            pitch: self.u8("pitch")?,
        })
    }

    fn bytes(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], FramingError> {
        if self.data.len() < len {
            return Err(self.truncated(field));
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    /// Fixed-width string: exactly [`STRING_LEN`] bytes padded with spaces.
    fn string(&mut self, field: &'static str) -> Result<String, FramingError> {
        if self.data.len() < STRING_LEN {
            return Err(FramingError::UnterminatedString {
                kind: self.kind,
                field,
            });
        }
        let raw = self.bytes(STRING_LEN, field)?;
        let end = raw
            .iter()
            .rposition(|b| *b != b' ' && *b != 0)
            .map_or(0, |i| i + 1);
        Ok(raw[..end]
            .iter()
            .map(|b| match *b {
                0x20..=0x7e => *b as char,
                _ => '?',
            })
            .collect())
    }
}

fn put_string(dst: &mut BytesMut, text: &str) {
    let clean = sanitize(text);
    let bytes = clean.as_bytes();
    let len = bytes.len().min(STRING_LEN);
    dst.put_slice(&bytes[..len]);
    dst.put_bytes(b' ', STRING_LEN - len);
}

fn put_block_pos(dst: &mut BytesMut, pos: BlockPos) {
    dst.put_i16(pos.x);
    dst.put_i16(pos.y);
    dst.put_i16(pos.z);
}

fn put_location(dst: &mut BytesMut, location: Location) {
    dst.put_i16(location.x);
    dst.put_i16(location.y);
    dst.put_i16(location.z);
    dst.put_u8(location.yaw);
    dst.put_u8(location.pitch);
}

/// Decodes one complete frame of the given kind.
///
/// `raw` must be the whole frame, kind byte included, exactly as long as the
/// length table declares for `kind`.
pub fn decode(kind: PacketKind, raw: &[u8]) -> Result<Packet, FramingError> {
    if raw.len() != kind.wire_len() {
        return Err(FramingError::LengthMismatch {
            kind,
            expected: kind.wire_len(),
            actual: raw.len(),
        });
    }
    if raw[0] != kind.as_byte() {
        return Err(FramingError::InvalidField {
            kind,
            field: "kind",
            value: i64::from(raw[0]),
        });
    }

    let mut r = FieldReader::new(kind, &raw[1..]);
    let packet = match kind {
        PacketKind::Identification => Packet::Identification(Identification {
            protocol_version: r.u8("protocol_version")?,
            name: r.string("name")?,
            key: r.string("key")?,
            user_type: r.u8("user_type")?,
        }),
        PacketKind::Ping => Packet::Ping,
        PacketKind::LevelInitialize => Packet::LevelInitialize,
        PacketKind::LevelDataChunk => {
            let length = r.i16("length")?;
            let data = r.bytes(LEVEL_CHUNK_LEN, "data")?;
            let used = usize::try_from(length)
                .ok()
                .filter(|len| *len <= LEVEL_CHUNK_LEN)
                .ok_or(FramingError::InvalidField {
                    kind,
                    field: "length",
                    value: i64::from(length),
                })?;
            Packet::LevelDataChunk {
                length,
                data: Bytes::copy_from_slice(&data[..used]),
                percent: r.u8("percent")?,
            }
        }
        PacketKind::LevelFinalize => Packet::LevelFinalize {
            width: r.i16("width")?,
            height: r.i16("height")?,
            length: r.i16("length")?,
        },
        PacketKind::SetBlockRequest => {
            let position = r.block_pos()?;
            let raw_mode = r.u8("mode")?;
            let mode = BlockMode::from_byte(raw_mode).ok_or(FramingError::InvalidField {
                kind,
                field: "mode",
                value: i64::from(raw_mode),
            })?;
            Packet::SetBlockRequest {
                position,
                mode,
                block: r.u8("block")?,
            }
        }
        PacketKind::SetBlock => Packet::SetBlock {
            position: r.block_pos()?,
            block: r.u8("block")?,
        },
        PacketKind::SpawnPlayer => Packet::SpawnPlayer {
            player_id: r.i8("player_id")?,
            name: r.string("name")?,
            location: r.location()?,
        },
        PacketKind::PositionUpdate => Packet::PositionUpdate {
            player_id: r.i8("player_id")?,
            location: r.location()?,
        },
        PacketKind::Despawn => Packet::Despawn {
            player_id: r.i8("player_id")?,
        },
        PacketKind::Message => Packet::Message {
            player_id: r.i8("player_id")?,
            text: r.string("text")?,
        },
        PacketKind::Disconnect => Packet::Disconnect {
            reason: r.string("reason")?,
        },
        PacketKind::UpdateUserType => Packet::UpdateUserType {
            user_type: r.u8("user_type")?,
        },
    };
    Ok(packet)
}

/// Decodes a frame whose kind is read from its first byte.
pub fn decode_frame(raw: &[u8], direction: Direction) -> Result<Packet, FramingError> {
    let first = *raw.first().ok_or(FramingError::Truncated {
        kind: PacketKind::Identification,
        field: "kind",
    })?;
    let kind = PacketKind::from_byte(first, direction)
        .ok_or(FramingError::UnknownKind { kind: first })?;
    decode(kind, raw)
}

/// Appends the wire form of `packet` to `dst`.
///
/// Strings longer than the field width are cut and non-ASCII characters are
/// replaced, so only a level chunk carrying more than 1024 bytes can fail.
pub fn encode(packet: &Packet, dst: &mut BytesMut) -> Result<(), FramingError> {
    let kind = packet.kind();
    if let Packet::LevelDataChunk { data, .. } = packet {
        if data.len() > LEVEL_CHUNK_LEN {
            return Err(FramingError::InvalidField {
                kind,
                field: "data",
                value: data.len() as i64,
            });
        }
    }
    dst.reserve(kind.wire_len());
    dst.put_u8(kind.as_byte());

    match packet {
        Packet::Identification(ident) => {
            dst.put_u8(ident.protocol_version);
            put_string(dst, &ident.name);
            put_string(dst, &ident.key);
            dst.put_u8(ident.user_type);
        }
        Packet::Ping | Packet::LevelInitialize => {}
        Packet::LevelDataChunk {
            length,
            data,
            percent,
        } => {
            dst.put_i16(*length);
            dst.put_slice(data);
            dst.put_bytes(0, LEVEL_CHUNK_LEN - data.len());
            dst.put_u8(*percent);
        }
        Packet::LevelFinalize {
            width,
            height,
            length,
        } => {
            dst.put_i16(*width);
            dst.put_i16(*height);
            dst.put_i16(*length);
        }
        Packet::SetBlockRequest {
            position,
            mode,
            block,
        } => {
            put_block_pos(dst, *position);
            dst.put_u8(mode.as_byte());
            dst.put_u8(*block);
        }
        Packet::SetBlock { position, block } => {
            put_block_pos(dst, *position);
            dst.put_u8(*block);
        }
        Packet::SpawnPlayer {
            player_id,
            name,
            location,
        } => {
            dst.put_i8(*player_id);
            put_string(dst, name);
            put_location(dst, *location);
        }
        Packet::PositionUpdate {
            player_id,
            location,
        } => {
            dst.put_i8(*player_id);
            put_location(dst, *location);
        }
        Packet::Despawn { player_id } => dst.put_i8(*player_id),
        Packet::Message { player_id, text } => {
            dst.put_i8(*player_id);
            put_string(dst, text);
        }
        Packet::Disconnect { reason } => put_string(dst, reason),
        Packet::UpdateUserType { user_type } => dst.put_u8(*user_type),
    }
    Ok(())
}

/// Encodes a single packet into a fresh buffer.
pub fn encode_to_bytes(packet: &Packet) -> Result<Bytes, FramingError> {
    let mut buf = BytesMut::with_capacity(packet.kind().wire_len());
    encode(packet, &mut buf)?;
    Ok(buf.freeze())
}

/// Tokio codec over the fixed-length packet stream.
///
/// Decoding uses the same framing rules as
/// [`FrameReader`](crate::frame::FrameReader); `FramedRead` keeps the residual
/// bytes between reads.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    inbound: Direction,
}

impl PacketCodec {
    /// Codec for the server side: decodes client packets.
    pub fn server() -> Self {
        Self {
            inbound: Direction::Serverbound,
        }
    }

    /// Codec for the client side: decodes server packets.
    pub fn client() -> Self {
        Self {
            inbound: Direction::Clientbound,
        }
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, ProtocolError> {
        match next_frame(src, self.inbound)? {
            Some(frame) => Ok(Some(decode_frame(&frame, self.inbound)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        encode(&item, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PROTOCOL_VERSION;

    fn identification_frame(name: &str, key: &str) -> Vec<u8> {
        let mut frame = vec![0x00, PROTOCOL_VERSION];
        let mut field = |text: &str| {
            let mut bytes = text.as_bytes().to_vec();
            bytes.resize(STRING_LEN, b' ');
            frame.extend_from_slice(&bytes);
        };
        field(name);
        field(key);
        frame.push(0x00);
        frame
    }

    #[test]
    fn decodes_identification_with_trimmed_strings() {
        let frame = identification_frame("Alice", "0123abcd");
        assert_eq!(frame.len(), 131);

        let packet = decode(PacketKind::Identification, &frame).unwrap();
        assert_eq!(
            packet,
            Packet::Identification(Identification {
                protocol_version: PROTOCOL_VERSION,
                name: "Alice".to_string(),
                key: "0123abcd".to_string(),
                user_type: 0,
            })
        );
    }

    #[test]
    fn decodes_set_block_request_fields_in_order() {
        let frame = [0x05, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x01, 0x04];
        let packet = decode(PacketKind::SetBlockRequest, &frame).unwrap();
        assert_eq!(
            packet,
            Packet::SetBlockRequest {
                position: BlockPos::new(1, 2, 3),
                mode: BlockMode::Place,
                block: 4,
            }
        );
    }

    #[test]
    fn rejects_short_frames_without_reading_past_them() {
        let frame = identification_frame("Alice", "key");
        let err = decode(PacketKind::Identification, &frame[..100]).unwrap_err();
        assert!(matches!(err, FramingError::LengthMismatch { actual: 100, .. }));
    }

    #[test]
    fn string_that_overruns_the_bound_is_a_framing_error() {
        let mut reader = FieldReader::new(PacketKind::Message, &[b'a'; 10]);
        let err = reader.string("text").unwrap_err();
        assert_eq!(
            err,
            FramingError::UnterminatedString {
                kind: PacketKind::Message,
                field: "text"
            }
        );
    }

    #[test]
    fn invalid_block_mode_is_rejected() {
        let frame = [0x05, 0, 1, 0, 1, 0, 1, 0x07, 0x01];
        let err = decode(PacketKind::SetBlockRequest, &frame).unwrap_err();
        assert!(matches!(err, FramingError::InvalidField { field: "mode", value: 7, .. }));
    }

    #[test]
    fn encoded_packets_have_table_length() {
        let packets = [
            Packet::Ping,
            Packet::message(3, "hello"),
            Packet::disconnect("bye"),
            Packet::SetBlock {
                position: BlockPos::new(1, 1, 1),
                block: 4,
            },
            Packet::SpawnPlayer {
                player_id: -1,
                name: "Alice".into(),
                location: Location::default(),
            },
            Packet::LevelDataChunk {
                length: 3,
                data: Bytes::from_static(&[1, 2, 3]),
                percent: 100,
            },
        ];
        for packet in packets {
            let bytes = encode_to_bytes(&packet).unwrap();
            assert_eq!(bytes.len(), packet.kind().wire_len(), "{:?}", packet.kind());
        }
    }

    #[test]
    fn long_and_non_ascii_text_is_cut_and_replaced() {
        let text = format!("héllo {}", "x".repeat(100));
        let bytes = encode_to_bytes(&Packet::message(0, text)).unwrap();
        let decoded = decode(PacketKind::Message, &bytes).unwrap();
        match decoded {
            Packet::Message { text, .. } => {
                assert_eq!(text.len(), STRING_LEN);
                assert!(text.starts_with("h?llo "));
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn oversized_level_chunk_cannot_be_encoded() {
        let packet = Packet::LevelDataChunk {
            length: 1024,
            data: Bytes::from(vec![0u8; LEVEL_CHUNK_LEN + 1]),
            percent: 0,
        };
        assert!(encode_to_bytes(&packet).is_err());

        let mut dst = BytesMut::from(&[0x01u8][..]);
        assert!(encode(&packet, &mut dst).is_err());
        assert_eq!(&dst[..], &[0x01]);
    }
}
