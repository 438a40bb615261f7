//! Length-prefixed framing.
//!
//! Format:
//! ```text
//! +----------------+------------------+
//! | length (u32 BE) |      body       |
//! +----------------+------------------+
//! |        4       |  length bytes    |
//! +----------------+------------------+
//! ```
//!
//! A frame whose declared length exceeds [`MAX_FRAME_BYTES`] is rejected
//! and the connection must be closed: an oversized prefix is either a
//! protocol violation or stream desynchronization, and resynchronizing a
//! length-prefixed stream is not possible.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix.
pub const LEN_PREFIX_BYTES: usize = 4;

/// Maximum frame body size (256 KiB). Management and handshake messages
/// are tiny; this cap bounds what one peer can make the router buffer.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

/// Framing error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    /// Declared or actual body size exceeds [`MAX_FRAME_BYTES`].
    #[error("message with incorrect size: {0} bytes")]
    Oversize(usize),
}

/// Append one frame to `out`.
pub fn encode_frame(body: &[u8], out: &mut BytesMut) -> Result<(), FrameError> {
    if body.len() > MAX_FRAME_BYTES {
        return Err(FrameError::Oversize(body.len()));
    }
    out.reserve(LEN_PREFIX_BYTES + body.len());
    out.put_u32(body.len() as u32);
    out.put_slice(body);
    Ok(())
}

/// Try to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when more data is needed. On success the consumed
/// bytes are removed from `buf`. The function holds no state of its own,
/// so it can be driven directly from unit tests with byte arrays.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
    if buf.len() < LEN_PREFIX_BYTES {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::Oversize(len));
    }
    if buf.len() < LEN_PREFIX_BYTES + len {
        return Ok(None);
    }
    buf.advance(LEN_PREFIX_BYTES);
    Ok(Some(buf.split_to(len).freeze()))
}
