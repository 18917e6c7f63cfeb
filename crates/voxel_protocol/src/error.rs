//! Error types for framing and packet coding.
//!
//! A [`FramingError`] means the byte stream can no longer be trusted and the
//! connection has to be closed; there is no resynchronisation on this
//! protocol because packets carry no length prefix.

use crate::packet::PacketKind;
use std::io;
use thiserror::Error;

/// The byte stream does not match the packet layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("unknown packet kind 0x{kind:02x}")]
    UnknownKind { kind: u8 },

    #[error("{kind:?} expects {expected} bytes, got {actual}")]
    LengthMismatch {
        kind: PacketKind,
        expected: usize,
        actual: usize,
    },

    #[error("string field `{field}` of {kind:?} does not terminate within the packet")]
    UnterminatedString {
        kind: PacketKind,
        field: &'static str,
    },

    #[error("field `{field}` of {kind:?} is truncated")]
    Truncated {
        kind: PacketKind,
        field: &'static str,
    },

    #[error("field `{field}` of {kind:?} holds invalid value {value}")]
    InvalidField {
        kind: PacketKind,
        field: &'static str,
        value: i64,
    },

    #[error("{kind:?} cannot be sent in this direction")]
    WrongDirection { kind: PacketKind },
}

/// Errors surfaced by the tokio codec.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
