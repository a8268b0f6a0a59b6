use std::path::PathBuf;

/// Errors that can occur while opening or driving a device link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified socket path.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified socket path.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The serial port could not be opened or configured.
    #[error("serial port {port}: {message}")]
    Serial { port: String, message: String },

    /// The radio link failed (scan, connect, GATT I/O).
    #[error("radio link error: {0}")]
    Radio(String),

    /// A chunk handed to the radio link exceeds the negotiated MTU.
    #[error("radio chunk of {len} bytes exceeds MTU {mtu}")]
    MtuExceeded { len: usize, mtu: usize },

    /// The link has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
