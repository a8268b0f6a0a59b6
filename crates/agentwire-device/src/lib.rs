//! Device-side session loops for agentwire.
//!
//! Each loop reads requests from one kind of device link, hands them to an
//! [`agentwire_rpc::RpcDispatcher`] and writes the replies back:
//! - [`SocketServer`]: Unix socket, many concurrent simulated devices
//! - [`serve_serial`]: blocking serial port bridged into the runtime
//! - [`serve_radio`]: MTU-limited radio link
//!
//! A link that closes mid-frame ends its session; malformed requests never do.

pub mod error;
pub mod radio;
pub mod serial;
pub mod session;
pub mod socket;

pub use error::{DeviceError, Result};
pub use radio::serve_radio;
pub use serial::{serve_blocking, serve_serial, BRIDGE_TIMEOUT};
pub use session::{serve_session, SessionStats};
pub use socket::{SocketServer, DEFAULT_SOCKET_PATH};
