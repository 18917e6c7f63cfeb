//! Reassembly of complete packets from arbitrary TCP reads.
//!
//! TCP hands us whatever prefix of the stream happens to be available: half a
//! packet, exactly one, or several glued together. [`FrameReader`] keeps the
//! undelivered remainder between reads and only yields a frame once every
//! byte the length table declares for its kind is present.

use crate::error::FramingError;
use crate::packet::{Direction, PacketKind, MAX_FRAME_LEN};
use bytes::{Bytes, BytesMut};
use tracing::trace;

/// Size of the frame at the head of `buf`, if its kind byte is present.
fn declared_len(buf: &[u8], direction: Direction) -> Result<Option<usize>, FramingError> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    let kind =
        PacketKind::from_byte(first, direction).ok_or(FramingError::UnknownKind { kind: first })?;
    Ok(Some(kind.wire_len()))
}

/// Splits one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` while the frame at the head is still incomplete; the
/// partial bytes stay in `buf` untouched.
pub fn next_frame(buf: &mut BytesMut, direction: Direction) -> Result<Option<Bytes>, FramingError> {
    match declared_len(buf, direction)? {
        Some(len) if buf.len() >= len => Ok(Some(buf.split_to(len).freeze())),
        _ => Ok(None),
    }
}

/// Per-connection residual buffer state machine.
#[derive(Debug)]
pub struct FrameReader {
    direction: Direction,
    buffer: BytesMut,
    /// Declared size of the frame being assembled; 0 while awaiting its kind byte.
    pending: usize,
}

impl FrameReader {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            buffer: BytesMut::with_capacity(MAX_FRAME_LEN),
            pending: 0,
        }
    }

    /// Reader for the server side of a connection.
    pub fn serverbound() -> Self {
        Self::new(Direction::Serverbound)
    }

    /// Reader for the client side of a connection.
    pub fn clientbound() -> Self {
        Self::new(Direction::Clientbound)
    }

    /// Appends `chunk` and returns every frame that is now complete, in order.
    ///
    /// The iterator stops at the first incomplete frame, leaving its bytes
    /// buffered for the next call, or after the first framing error.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        trace!(
            received = chunk.len(),
            buffered = self.buffer.len(),
            "frame reader fed"
        );
        Frames {
            reader: self,
            done: false,
        }
    }

    /// Bytes received but not yet yielded as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Declared size of the frame currently being assembled, 0 if none.
    pub fn pending_len(&self) -> usize {
        self.pending
    }

    fn next_frame(&mut self) -> Result<Option<Bytes>, FramingError> {
        if self.pending == 0 {
            match declared_len(&self.buffer, self.direction)? {
                Some(len) => self.pending = len,
                None => return Ok(None),
            }
        }
        if self.buffer.len() < self.pending {
            return Ok(None);
        }
        let frame = self.buffer.split_to(self.pending).freeze();
        self.pending = 0;
        Ok(Some(frame))
    }
}

/// Frames made complete by a single [`FrameReader::feed`] call.
pub struct Frames<'a> {
    reader: &'a mut FrameReader,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Bytes, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
