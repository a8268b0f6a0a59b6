//! Message framing over MTU-limited radio links.
//!
//! Outbound messages are split into MTU-sized chunks and written back to back
//! while holding a per-link lock, so a second message can never interleave
//! with one already in flight.
//!
//! Inbound messages carry no length prefix. One notification batch from the
//! link is taken to be one complete message. A message the device paces out
//! over several separate batches arrives here as several messages; the device
//! side has to avoid that.

use std::sync::Arc;

use agentwire_transport::RadioLink;
use bytes::{Bytes, BytesMut};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::Result;

/// Split `payload` into consecutive chunks of at most `mtu` bytes.
pub fn mtu_chunks(payload: &[u8], mtu: usize) -> std::slice::Chunks<'_, u8> {
    payload.chunks(mtu.max(1))
}

/// Reassembles one notification batch into one logical message.
#[derive(Debug, Default)]
pub struct NotificationAssembler {
    buf: BytesMut,
}

impl NotificationAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate a batch. Returns `None` when the batch carried no bytes.
    pub fn assemble(&mut self, batch: Vec<Vec<u8>>) -> Option<Bytes> {
        self.buf.clear();
        for notification in batch {
            self.buf.extend_from_slice(&notification);
        }
        if self.buf.is_empty() {
            return None;
        }
        Some(self.buf.split().freeze())
    }
}

/// Message-level send/receive over a [`RadioLink`].
pub struct RadioFramer {
    link: Arc<dyn RadioLink>,
    send_lock: Mutex<()>,
    assembler: Mutex<NotificationAssembler>,
}

impl RadioFramer {
    pub fn new(link: Arc<dyn RadioLink>) -> Self {
        Self {
            link,
            send_lock: Mutex::new(()),
            assembler: Mutex::new(NotificationAssembler::new()),
        }
    }

    pub fn link(&self) -> &Arc<dyn RadioLink> {
        &self.link
    }

    /// Write `payload` as a sequence of MTU-sized chunks.
    ///
    /// Returns the number of chunks written.
    pub async fn send_message(&self, payload: &[u8]) -> Result<usize> {
        let _in_flight = self.send_lock.lock().await;
        let mtu = self.link.mtu();
        let mut written = 0usize;
        for chunk in mtu_chunks(payload, mtu) {
            self.link.write_chunk(chunk).await?;
            written += 1;
        }
        debug!(len = payload.len(), chunks = written, mtu, "radio message sent");
        Ok(written)
    }

    /// Wait for the next inbound message.
    ///
    /// Empty batches are skipped. Returns `Ok(None)` once the link is gone.
    pub async fn next_message(&self) -> Result<Option<Bytes>> {
        loop {
            let Some(batch) = self.link.next_notification_batch().await? else {
                return Ok(None);
            };
            trace!(notifications = batch.len(), "radio batch received");
            if let Some(message) = self.assembler.lock().await.assemble(batch) {
                return Ok(Some(message));
            }
        }
    }
}
