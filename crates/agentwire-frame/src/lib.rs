//! Length-prefixed framing for agentwire device links.
//!
//! Every message on a socket or serial link is framed as:
//! - A 2-byte big-endian payload length
//! - The payload itself (at most 65535 bytes)
//!
//! No partial reads, no buffer management in user code. Radio links have no
//! length prefix on the inbound path; see [`radio`].

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;
#[cfg(feature = "async")]
pub mod radio;

pub use codec::{decode_frame, encode_frame, Frame, HEADER_SIZE, MAX_PAYLOAD};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::FrameCodec;
#[cfg(feature = "async")]
pub use radio::{mtu_chunks, NotificationAssembler, RadioFramer};
