use std::sync::Arc;

use agentwire_frame::RadioFramer;
use agentwire_rpc::RpcDispatcher;
use agentwire_transport::RadioLink;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::session::{answer, SessionStats};

/// Serve a device over a radio link.
///
/// Each notification batch is one request; the reply goes back as MTU-sized
/// chunks. The session ends when the peer disconnects or `shutdown` fires.
pub async fn serve_radio(
    link: Arc<dyn RadioLink>,
    dispatcher: RpcDispatcher,
    shutdown: CancellationToken,
) -> Result<SessionStats> {
    let peer = link.peer_name();
    let framer = RadioFramer::new(link);
    let mut stats = SessionStats::default();
    info!(peer = %peer, mtu = framer.link().mtu(), "radio device connected");

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                info!(peer = %peer, "radio session stopped by shutdown");
                break;
            }
            next = framer.next_message() => next?,
        };
        let Some(request) = next else {
            info!(peer = %peer, requests = stats.requests, "radio device disconnected");
            break;
        };

        let reply = answer(&dispatcher, &request).await;
        framer.send_message(&reply).await?;
        stats.requests += 1;
    }

    Ok(stats)
}
