use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Default UART speed for development boards.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Poll interval for blocking reads; bounds how long shutdown takes to be noticed.
const READ_POLL: Duration = Duration::from_millis(200);

/// A blocking serial link to a device.
///
/// Reads never surface the port's poll timeout: they keep waiting until data
/// arrives or the link is shut down, at which point they report end-of-stream
/// (`Ok(0)`). That lets a sync frame reader treat shutdown as a clean EOF.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    name: String,
    running: Arc<AtomicBool>,
}

/// Handle that stops every clone of a [`SerialLink`].
#[derive(Clone, Debug)]
pub struct SerialShutdown(Arc<AtomicBool>);

impl SerialShutdown {
    pub fn shutdown(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        !self.0.load(Ordering::SeqCst)
    }
}

impl SerialLink {
    /// Open `port` at `baud_rate` (8N1, no flow control).
    pub fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let handle = serialport::new(port, baud_rate)
            .timeout(READ_POLL)
            .open()
            .map_err(|e| TransportError::Serial {
                port: port.to_string(),
                message: e.to_string(),
            })?;
        info!(port, baud_rate, "opened serial port");
        Ok(Self {
            port: handle,
            name: port.to_string(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// A second handle on the same port, sharing the shutdown flag.
    ///
    /// Used to split the link into independent read and write halves.
    pub fn try_clone(&self) -> Result<Self> {
        let port = self.port.try_clone().map_err(|e| TransportError::Serial {
            port: self.name.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            port,
            name: self.name.clone(),
            running: Arc::clone(&self.running),
        })
    }

    pub fn shutdown_handle(&self) -> SerialShutdown {
        SerialShutdown(Arc::clone(&self.running))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_polling(&mut self.port, &self.running, buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "serial link shut down",
            ));
        }
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("port", &self.name)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

fn read_polling<R: Read + ?Sized>(
    reader: &mut R,
    running: &AtomicBool,
    buf: &mut [u8],
) -> io::Result<usize> {
    loop {
        if !running.load(Ordering::SeqCst) {
            debug!("serial read after shutdown; reporting end of stream");
            return Ok(0);
        }
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
