use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::message::{ChannelKind, IncomingMessage};

/// Callback a channel invokes for every admitted message.
///
/// Resolves to the reply text. Channels that answer inline (webhook,
/// websocket) deliver it themselves; the others get it through
/// [`Channel::send`].
pub type OnMessage = Arc<dyn Fn(IncomingMessage) -> BoxFuture<'static, String> + Send + Sync>;

/// One external messaging protocol adapted to [`IncomingMessage`].
#[async_trait]
pub trait Channel: Send + Sync {
    /// Transport this channel serves. Also its registration name.
    fn kind(&self) -> ChannelKind;

    /// Receive until stopped, calling `on_message` for each admitted message.
    ///
    /// Messages from one channel are handled in arrival order.
    async fn start(&self, on_message: OnMessage) -> Result<()>;

    /// Deliver `text` to `channel_id`. A no-op for inline channels.
    async fn send(&self, channel_id: &str, text: &str) -> Result<()>;

    /// Release listeners and connections. Safe to call before or without
    /// `start`, and more than once.
    async fn stop(&self) -> Result<()>;
}

/// Wrap an async closure as an [`OnMessage`] callback.
pub fn on_message<F, Fut>(f: F) -> OnMessage
where
    F: Fn(IncomingMessage) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = String> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Hand queued messages to `on_message` one at a time, in arrival order.
///
/// Gateway and webhook channels push into the queue so their socket or HTTP
/// side keeps running (acks, heartbeats) while a reply is being produced.
/// Returns once every sender is dropped and the queue is empty.
pub(crate) async fn drain_in_order(
    mut queue: mpsc::UnboundedReceiver<IncomingMessage>,
    on_message: OnMessage,
) {
    while let Some(message) = queue.recv().await {
        on_message(message).await;
    }
}
