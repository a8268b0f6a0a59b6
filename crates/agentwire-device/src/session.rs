use agentwire_frame::{FrameCodec, FrameError, MAX_PAYLOAD};
use agentwire_rpc::{RpcDispatcher, RpcReply};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

const PREVIEW_BYTES: usize = 100;

/// Counters for one finished session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub requests: u64,
}

/// Dispatch one request payload and return a reply that fits in one frame.
///
/// A reply too large for the 16-bit length field is replaced with an error
/// reply; it is never truncated.
pub(crate) async fn answer(dispatcher: &RpcDispatcher, payload: &[u8]) -> Vec<u8> {
    debug!(len = payload.len(), preview = %preview(payload), "<- request");
    let reply = dispatcher.dispatch(payload).await;
    debug!(len = reply.len(), preview = %preview(&reply), "-> reply");
    cap_reply(reply)
}

pub(crate) fn cap_reply(reply: Vec<u8>) -> Vec<u8> {
    if reply.len() <= MAX_PAYLOAD {
        return reply;
    }
    warn!(len = reply.len(), max = MAX_PAYLOAD, "reply exceeds frame limit");
    RpcReply::Error {
        error: format!(
            "reply too large for frame ({} bytes, max {MAX_PAYLOAD})",
            reply.len()
        ),
    }
    .to_vec()
}

pub(crate) fn preview(bytes: &[u8]) -> String {
    String::from_utf8_lossy(&bytes[..bytes.len().min(PREVIEW_BYTES)]).into_owned()
}

/// Serve one framed device session until the device disconnects or
/// `shutdown` fires.
///
/// Requests are answered strictly in order, one reply per request. A clean
/// disconnect between frames ends the session with `Ok`; a link that closes
/// mid-frame ends it with [`FrameError::TransportClosed`].
pub async fn serve_session<S>(
    stream: S,
    dispatcher: &RpcDispatcher,
    peer: &str,
    shutdown: CancellationToken,
) -> Result<SessionStats>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, FrameCodec::new());
    let mut stats = SessionStats::default();
    info!(peer, "device connected");

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                info!(peer, "session stopped by shutdown");
                break;
            }
            next = framed.next() => next,
        };

        let frame = match next {
            None => {
                info!(peer, requests = stats.requests, "device disconnected");
                break;
            }
            Some(Err(FrameError::TransportClosed)) => {
                warn!(peer, "device link closed mid-frame");
                return Err(FrameError::TransportClosed.into());
            }
            Some(Err(err)) => return Err(err.into()),
            Some(Ok(frame)) => frame,
        };

        let reply = answer(dispatcher, &frame.payload).await;
        framed.send(Bytes::from(reply)).await?;
        stats.requests += 1;
    }

    Ok(stats)
}
