use std::fmt;
use std::io;

use agentwire_channels::ChannelError;
use agentwire_device::DeviceError;
use agentwire_frame::FrameError;
use agentwire_rpc::RpcError;
use agentwire_transport::TransportError;

pub const SUCCESS: i32 = 0;
/// Missing credentials, invalid invocation, failed tool run.
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(FAILURE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::TransportClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn device_error(context: &str, err: DeviceError) -> CliError {
    match err {
        DeviceError::Transport(err) => transport_error(context, err),
        DeviceError::Frame(err) => frame_error(context, err),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    match err {
        RpcError::Io(source) => io_error(context, source),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Bind { source, .. } | ChannelError::Io(source) => io_error(context, source),
        ChannelError::Config(_) | ChannelError::DuplicateChannel(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_keeps_its_code() {
        let err = io_error("bind", io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(err.code, PERMISSION_DENIED);
        assert!(err.message.starts_with("bind: "));
    }

    #[test]
    fn closed_mid_frame_is_a_transport_error() {
        let err = device_error("serial", DeviceError::Frame(FrameError::TransportClosed));
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn oversized_frame_is_invalid_data() {
        let err = frame_error(
            "write",
            FrameError::PayloadTooLarge {
                size: 70_000,
                max: 65_535,
            },
        );
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn duplicate_channel_is_a_plain_failure() {
        let err = channel_error("serve", ChannelError::DuplicateChannel("webhook".into()));
        assert_eq!(err.code, FAILURE);
    }
}
