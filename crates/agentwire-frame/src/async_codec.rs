use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, Frame};
use crate::error::FrameError;

/// `tokio_util` codec for the 2-byte length-prefixed wire format.
///
/// Use with `tokio_util::codec::Framed` over any `AsyncRead + AsyncWrite`.
/// A stream that ends between frames yields `None`; one that ends inside a
/// frame yields [`FrameError::TransportClosed`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        Ok(decode_frame(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match decode_frame(src) {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                src.clear();
                Err(FrameError::TransportClosed)
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(&payload, dst)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(&frame.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(client, FrameCodec::new());
        let mut stream = FramedRead::new(server, FrameCodec::new());

        sink.send(Bytes::from_static(b"ping")).await.unwrap();
        sink.send(Frame::new("pong")).await.unwrap();
        drop(sink);

        assert_eq!(stream.next().await.unwrap().unwrap().payload.as_ref(), b"ping");
        assert_eq!(stream.next().await.unwrap().unwrap().payload.as_ref(), b"pong");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn short_header_at_eof_is_transport_closed() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut stream = FramedRead::new(server, FrameCodec::new());

        client.write_all(&[0x00]).await.unwrap();
        drop(client);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::TransportClosed));
    }

    #[tokio::test]
    async fn short_payload_at_eof_is_transport_closed() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut stream = FramedRead::new(server, FrameCodec::new());

        client.write_all(&[0x00, 0x0A, b'a', b'b']).await.unwrap();
        drop(client);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::TransportClosed));
    }

    #[test]
    fn oversized_payload_fails_to_encode() {
        let mut dst = BytesMut::new();
        let err = FrameCodec
            .encode(Bytes::from(vec![0u8; 70_000]), &mut dst)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }
}
