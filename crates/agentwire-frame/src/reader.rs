use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_frame, Frame};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary and
    /// `Err(FrameError::TransportClosed)` when it ends inside a header or
    /// payload.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf) {
                return Ok(Some(frame));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::TransportClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::encode_frame;

    #[test]
    fn read_single_frame() {
        let mut wire = BytesMut::new();
        encode_frame(b"hello", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap().unwrap();

        assert_eq!(frame.payload.as_ref(), b"hello");
    }

    #[test]
    fn read_multiple_frames_then_end_of_stream() {
        let mut wire = BytesMut::new();
        encode_frame(b"one", &mut wire).unwrap();
        encode_frame(b"two", &mut wire).unwrap();
        encode_frame(b"three", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));

        assert_eq!(reader.read_frame().unwrap().unwrap().payload.as_ref(), b"one");
        assert_eq!(reader.read_frame().unwrap().unwrap().payload.as_ref(), b"two");
        assert_eq!(
            reader.read_frame().unwrap().unwrap().payload.as_ref(),
            b"three"
        );
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn read_frame_with_max_payload() {
        let payload = vec![0xAB; u16::MAX as usize];
        let mut wire = BytesMut::new();
        encode_frame(&payload, &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap().unwrap();

        assert_eq!(frame.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn partial_read_handling() {
        let mut wire = BytesMut::new();
        encode_frame(b"slow", &mut wire).unwrap();

        let byte_reader = ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        let frame = reader.read_frame().unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"slow");
    }

    #[test]
    fn empty_stream_is_end_of_stream() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn closed_after_one_header_byte() {
        let mut reader = FrameReader::new(Cursor::new(vec![0x00]));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::TransportClosed));
    }

    #[test]
    fn closed_mid_payload() {
        let mut partial = BytesMut::new();
        partial.put_u16(16);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::TransportClosed));
    }

    /// Fails each read once with `kind` before handing over the next byte.
    struct StutterReader {
        bytes: Vec<u8>,
        pos: usize,
        kind: ErrorKind,
        failed: bool,
    }

    impl Read for StutterReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.failed {
                self.failed = true;
                return Err(std::io::Error::from(self.kind));
            }
            self.failed = false;
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    fn stutter(kind: ErrorKind, payload: &[u8]) -> StutterReader {
        let mut wire = BytesMut::new();
        encode_frame(payload, &mut wire).unwrap();
        StutterReader {
            bytes: wire.to_vec(),
            pos: 0,
            kind,
            failed: false,
        }
    }

    #[test]
    fn would_block_and_interrupted_reads_are_retried() {
        for kind in [ErrorKind::WouldBlock, ErrorKind::Interrupted] {
            let mut reader = FrameReader::new(stutter(kind, b"again"));
            let frame = reader.read_frame().unwrap().unwrap();
            assert_eq!(frame.payload.as_ref(), b"again", "{kind:?}");
            assert!(reader.read_frame().unwrap().is_none());
        }
    }

    #[test]
    fn other_read_errors_surface() {
        let mut reader = FrameReader::new(stutter(ErrorKind::ConnectionReset, b"x"));
        assert!(matches!(reader.read_frame(), Err(FrameError::Io(_))));
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            if buf.is_empty() {
                return Ok(0);
            }

            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn roundtrip_over_pipe() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.write_payload(b"ping").unwrap();
        let frame = reader.read_frame().unwrap().unwrap();

        assert_eq!(frame.payload.as_ref(), b"ping");
    }

    #[test]
    fn peer_drop_after_complete_frames_is_end_of_stream() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.write_payload(b"last").unwrap();
        drop(writer);

        assert_eq!(reader.read_frame().unwrap().unwrap().payload.as_ref(), b"last");
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn concurrent_reader_writer_threads() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let reader = FrameReader::new(right);
        let reader = Arc::new(Mutex::new(reader));

        let reader_thread = {
            let reader = Arc::clone(&reader);
            std::thread::spawn(move || {
                for expected in 0..64u16 {
                    let frame = reader.lock().unwrap().read_frame().unwrap().unwrap();
                    assert_eq!(frame.payload.as_ref(), format!("msg-{expected}").as_bytes());
                }
            })
        };

        for i in 0..64u16 {
            let payload = format!("msg-{i}");
            writer.write_payload(payload.as_bytes()).unwrap();
        }

        reader_thread.join().unwrap();
    }

    #[test]
    fn read_would_block_propagates_io_error() {
        let mut wire = BytesMut::new();
        encode_frame(b"ok", &mut wire).unwrap();

        let reader = FlakyReader {
            first_error: Some(ErrorKind::WouldBlock),
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn interrupted_read_retries() {
        let mut wire = BytesMut::new();
        encode_frame(b"ok", &mut wire).unwrap();

        let reader = FlakyReader {
            first_error: Some(ErrorKind::Interrupted),
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap().unwrap();

        assert_eq!(frame.payload.as_ref(), b"ok");
    }

    struct FlakyReader {
        first_error: Option<ErrorKind>,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for FlakyReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.first_error.take() {
                return Err(std::io::Error::from(kind));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut reader = FrameReader::new(cursor);

        let _ = reader.get_ref();
        let _ = reader.get_mut();
        let _inner = reader.into_inner();
    }
}
