/// Errors that end a device session.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Link-level error.
    #[error("transport error: {0}")]
    Transport(#[from] agentwire_transport::TransportError),

    /// Frame-level error, including a link closed mid-frame.
    #[error("frame error: {0}")]
    Frame(#[from] agentwire_frame::FrameError),

    /// A blocking session worker panicked or was cancelled.
    #[error("session worker failed: {0}")]
    Worker(String),
}

impl From<tokio::task::JoinError> for DeviceError {
    fn from(err: tokio::task::JoinError) -> Self {
        DeviceError::Worker(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
