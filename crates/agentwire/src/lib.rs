//! Bridge embedded agents and chat channels to a completion API and local tools.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte links (Unix socket, serial port, radio)
//! - [`frame`]: `[u16 length][payload]` framing and radio chunking
//! - [`rpc`]: request dispatch, tool registry, completion client
//! - [`device`]: device session loops over each link
//! - [`channels`]: chat channel adapters and the message router

/// Re-export transport types.
pub mod transport {
    pub use agentwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use agentwire_frame::*;
}

/// Re-export RPC types.
pub mod rpc {
    pub use agentwire_rpc::*;
}

/// Re-export device session types.
pub mod device {
    pub use agentwire_device::*;
}

/// Re-export channel and router types.
pub mod channels {
    pub use agentwire_channels::*;
}
