use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, Frame};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
///
/// Header and payload go out as one buffer, so a frame is never split across
/// two writes that another writer could interleave with.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_payload(frame.payload.as_ref())
    }

    /// Encode and send a payload.
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_frame(payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::TransportClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
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

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{decode_frame, Frame, MAX_PAYLOAD};

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> BytesMut {
        BytesMut::from(writer.into_inner().into_inner().as_slice())
    }

    #[test]
    fn write_single_frame() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_payload(b"hello").unwrap();

        let mut wire = written(writer);
        assert_eq!(&wire[..2], &[0x00, 0x05]);
        let frame = decode_frame(&mut wire).unwrap();
        assert_eq!(frame.payload.as_ref(), b"hello");
    }

    #[test]
    fn write_multiple_frames() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.write_payload(b"one").unwrap();
        writer.write_payload(b"two").unwrap();
        writer.write_frame(&Frame::new("three")).unwrap();

        let mut wire = written(writer);
        assert_eq!(decode_frame(&mut wire).unwrap().payload.as_ref(), b"one");
        assert_eq!(decode_frame(&mut wire).unwrap().payload.as_ref(), b"two");
        assert_eq!(decode_frame(&mut wire).unwrap().payload.as_ref(), b"three");
    }

    #[test]
    fn payload_too_large_rejected_without_writing() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        let err = writer.write_payload(&vec![0u8; MAX_PAYLOAD + 1]).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.write_payload(b"x").unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let mut writer = FrameWriter::new(RetryOnceWriter::new(ErrorKind::Interrupted));
        writer.write_payload(b"retry").unwrap();
        assert_eq!(writer.into_inner().data.len(), 2 + 5);
    }

    #[test]
    fn handles_would_block_write_and_flush() {
        let mut writer = FrameWriter::new(RetryOnceWriter::new(ErrorKind::WouldBlock));
        writer.write_payload(b"retry").unwrap();
        assert_eq!(writer.into_inner().data.len(), 2 + 5);
    }

    #[test]
    fn transport_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.write_payload(b"x").unwrap_err();
        assert!(matches!(err, FrameError::TransportClosed));
    }

    #[test]
    fn accessors_and_into_inner() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        let _ = writer.get_ref();
        let _ = writer.get_mut();
        let _inner = writer.into_inner();
    }

    #[test]
    fn written_bytes_decode() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_payload(b"z").unwrap();

        let wire = writer.into_inner().into_inner();
        let mut framed = crate::reader::FrameReader::new(Cursor::new(wire));
        let frame = framed.read_frame().unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"z");
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RetryOnceWriter {
        kind: ErrorKind,
        write_failed: bool,
        flush_failed: bool,
        data: Vec<u8>,
    }

    impl RetryOnceWriter {
        fn new(kind: ErrorKind) -> Self {
            Self {
                kind,
                write_failed: false,
                flush_failed: false,
                data: Vec::new(),
            }
        }
    }

    impl Write for RetryOnceWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.write_failed {
                self.write_failed = true;
                return Err(std::io::Error::from(self.kind));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_failed {
                self.flush_failed = true;
                return Err(std::io::Error::from(self.kind));
            }
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
