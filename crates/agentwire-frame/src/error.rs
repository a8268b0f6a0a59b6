/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit the 16-bit length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link closed mid-frame (short header or short payload).
    #[error("transport closed (incomplete frame)")]
    TransportClosed,

    /// The underlying device link failed.
    #[error(transparent)]
    Transport(#[from] agentwire_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, FrameError>;
