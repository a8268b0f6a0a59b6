use std::net::SocketAddr;

/// Errors raised by channel adapters and the message router.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A listener could not bind its address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Serving an accepted connection failed.
    #[error("server on {addr} failed: {source}")]
    Serve {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A channel with this name is already registered.
    #[error("channel already registered: {0}")]
    DuplicateChannel(String),

    /// The Telegram Bot API rejected a call.
    #[error("telegram API error: {0}")]
    Telegram(String),

    /// A chat platform's HTTP API rejected a call.
    #[error("{service} API error: {message}")]
    Api {
        service: crate::message::ChannelKind,
        message: String,
    },

    /// A gateway websocket failed or broke protocol.
    #[error("{service} gateway error: {message}")]
    Gateway {
        service: crate::message::ChannelKind,
        message: String,
    },

    /// The MQTT client failed.
    #[error("mqtt error: {0}")]
    Mqtt(String),

    /// `send` was called on a channel that holds no live connection.
    #[error("{0} channel is not connected")]
    NotConnected(String),

    /// A channel task panicked or was aborted.
    #[error("channel task failed: {0}")]
    TaskFailed(String),

    /// The application handler failed.
    #[error("{0}")]
    Handler(String),

    /// The channel configuration file could not be used.
    #[error("invalid channel config: {0}")]
    Config(String),

    /// An HTTP call failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A body was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
