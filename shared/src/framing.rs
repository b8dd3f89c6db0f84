//! Length-prefixed framing for the reliable stream.
//!
//! Each message is sent as a big-endian `u16` payload length followed by
//! the payload. Datagrams carry bare payloads and never pass through here.

use crate::protocol::{ProtocolError, MAX_PACKET_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 2;

/// Prefixes `payload` with its length.
pub fn frame(payload: &[u8]) -> Result<Bytes, ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::Undersized);
    }
    if payload.len() > MAX_PACKET_LEN {
        return Err(ProtocolError::Oversized {
            len: payload.len(),
            max: MAX_PACKET_LEN,
        });
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Reassembles frames from arbitrarily split stream reads.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_len(MAX_PACKET_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            max_len,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete payload, or `None` until enough bytes have
    /// arrived. A bad length prefix poisons the stream; callers are expected
    /// to drop the connection.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = usize::from(u16::from_be_bytes([self.buffer[0], self.buffer[1]]));
        if len == 0 {
            return Err(ProtocolError::Undersized);
        }
        if len > self.max_len {
            return Err(ProtocolError::Oversized {
                len,
                max: self.max_len,
            });
        }
        if self.buffer.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buffer.advance(HEADER_LEN);
        Ok(Some(self.buffer.split_to(len).freeze()))
    }
}
