//! Short-range radio links.
//!
//! A radio link is MTU-limited and half-duplex. The bridge writes outbound
//! data as a sequence of chunks no larger than [`RadioLink::mtu`] and receives
//! inbound data as batches of notification payloads. There is no length prefix
//! on the inbound side; see `agentwire_frame::radio` for how batches become
//! messages.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, TransportError};

/// Negotiated write size used by the reference device firmware.
pub const DEFAULT_RADIO_MTU: usize = 244;

/// A connected radio peer.
#[async_trait]
pub trait RadioLink: Send + Sync {
    /// Largest chunk [`write_chunk`](Self::write_chunk) accepts.
    fn mtu(&self) -> usize;

    /// Write one chunk. Chunks longer than the MTU are rejected.
    async fn write_chunk(&self, chunk: &[u8]) -> Result<()>;

    /// Wait for the next batch of notifications.
    ///
    /// Returns `Ok(None)` once the peer has disconnected.
    async fn next_notification_batch(&self) -> Result<Option<Vec<Vec<u8>>>>;

    /// Human-readable peer identity for logs.
    fn peer_name(&self) -> String;
}

/// In-process radio link used for desktop simulation and tests.
///
/// [`MemoryRadio::pair`] returns the bridge-side link and a [`MemoryRadioPeer`]
/// that plays the device: it pushes notification batches and observes the
/// chunks the bridge writes.
pub struct MemoryRadio {
    mtu: usize,
    batches: Mutex<mpsc::UnboundedReceiver<Vec<Vec<u8>>>>,
    written: mpsc::UnboundedSender<Vec<u8>>,
}

/// Device side of a [`MemoryRadio`].
pub struct MemoryRadioPeer {
    batches: Option<mpsc::UnboundedSender<Vec<Vec<u8>>>>,
    written: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryRadio {
    pub fn pair(mtu: usize) -> (MemoryRadio, MemoryRadioPeer) {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        (
            MemoryRadio {
                mtu,
                batches: Mutex::new(batch_rx),
                written: written_tx,
            },
            MemoryRadioPeer {
                batches: Some(batch_tx),
                written: written_rx,
            },
        )
    }
}

#[async_trait]
impl RadioLink for MemoryRadio {
    fn mtu(&self) -> usize {
        self.mtu
    }

    async fn write_chunk(&self, chunk: &[u8]) -> Result<()> {
        if chunk.len() > self.mtu {
            return Err(TransportError::MtuExceeded {
                len: chunk.len(),
                mtu: self.mtu,
            });
        }
        self.written
            .send(chunk.to_vec())
            .map_err(|_| TransportError::Shutdown)
    }

    async fn next_notification_batch(&self) -> Result<Option<Vec<Vec<u8>>>> {
        Ok(self.batches.lock().await.recv().await)
    }

    fn peer_name(&self) -> String {
        "memory-radio".to_string()
    }
}

impl MemoryRadioPeer {
    /// Deliver one batch of notifications to the bridge.
    pub fn notify(&self, batch: Vec<Vec<u8>>) -> Result<()> {
        self.batches
            .as_ref()
            .ok_or(TransportError::Shutdown)?
            .send(batch)
            .map_err(|_| TransportError::Shutdown)
    }

    /// Next chunk written by the bridge, or `None` once the bridge side is gone.
    pub async fn recv_chunk(&mut self) -> Option<Vec<u8>> {
        self.written.recv().await
    }

    /// Drop the notification side, which the bridge observes as a disconnect.
    pub fn disconnect(&mut self) {
        self.batches = None;
    }
}
