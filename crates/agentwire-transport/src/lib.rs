//! Device links for agentwire.
//!
//! Provides the byte-oriented links an embedded agent reaches the bridge over:
//! - Unix domain sockets (desktop simulation of a device)
//! - Serial ports (UART-attached development boards)
//! - Short-range radio (MTU-limited, half-duplex, notification-driven)
//!
//! This is the lowest layer of agentwire. Framing lives one layer up, in
//! `agentwire-frame`; nothing here knows about payload semantics.

pub mod error;
pub mod radio;
pub mod serial;
pub mod stream;

#[cfg(unix)]
pub mod uds;

#[cfg(feature = "ble")]
pub mod ble;

pub use error::{Result, TransportError};
pub use radio::{MemoryRadio, MemoryRadioPeer, RadioLink, DEFAULT_RADIO_MTU};
pub use serial::{SerialLink, SerialShutdown, DEFAULT_BAUD_RATE};
pub use stream::DeviceStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;

#[cfg(feature = "ble")]
pub use ble::BleLink;
