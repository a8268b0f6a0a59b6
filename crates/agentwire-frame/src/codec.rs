use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: big-endian payload length (2 bytes).
pub const HEADER_SIZE: usize = 2;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// One length-delimited unit carrying an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬──────────────────┐
/// │ Length (2B BE)   │ Payload          │
/// │                  │ (Length bytes)   │
/// └──────────────────┴──────────────────┘
/// ```
///
/// Payloads longer than [`MAX_PAYLOAD`] are rejected, never truncated.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u16(payload.len() as u16);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `None` if the buffer doesn't contain a complete frame yet. On
/// success, consumes the frame bytes from the buffer. Any two bytes are a
/// valid header, so decoding itself cannot fail.
pub fn decode_frame(src: &mut BytesMut) -> Option<Frame> {
    if src.len() < HEADER_SIZE {
        return None;
    }

    let payload_len = u16::from_be_bytes([src[0], src[1]]) as usize;
    if src.len() < HEADER_SIZE + payload_len {
        return None;
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    Some(Frame { payload })
}
