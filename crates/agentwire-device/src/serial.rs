use std::io::{Read, Write};
use std::time::Duration;

use agentwire_frame::{FrameError, FrameReader, FrameWriter};
use agentwire_rpc::{RpcDispatcher, RpcReply};
use agentwire_transport::SerialLink;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::session::{answer, cap_reply, SessionStats};

/// Wall-clock cap on one request bridged from the blocking link into the runtime.
pub const BRIDGE_TIMEOUT: Duration = Duration::from_secs(120);

/// Serve a device on a serial port.
///
/// The port only offers blocking I/O, so the read/dispatch/write loop runs on
/// the blocking pool and each dispatch is bridged back into the runtime.
/// `shutdown` stops the port, which the loop sees as end of stream.
pub async fn serve_serial(
    link: SerialLink,
    dispatcher: RpcDispatcher,
    shutdown: CancellationToken,
) -> Result<SessionStats> {
    let name = link.name().to_string();
    let writer = link.try_clone()?;
    let stopper = link.shutdown_handle();
    let handle = Handle::current();

    let watcher = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            stopper.shutdown();
        })
    };

    let peer = name.clone();
    let result = tokio::task::spawn_blocking(move || {
        serve_blocking(link, writer, &dispatcher, &handle, &peer, BRIDGE_TIMEOUT)
    })
    .await;
    watcher.abort();

    let stats = result??;
    info!(port = %name, requests = stats.requests, "serial session ended");
    Ok(stats)
}

/// Blocking session loop over any reader/writer pair.
///
/// Must run off the async worker threads (it blocks on `handle`).
pub fn serve_blocking<R: Read, W: Write>(
    reader: R,
    writer: W,
    dispatcher: &RpcDispatcher,
    handle: &Handle,
    peer: &str,
    timeout: Duration,
) -> Result<SessionStats> {
    let mut reader = FrameReader::new(reader);
    let mut writer = FrameWriter::new(writer);
    let mut stats = SessionStats::default();
    info!(peer, "device connected");

    loop {
        let frame = match reader.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!(peer, requests = stats.requests, "device disconnected");
                return Ok(stats);
            }
            Err(FrameError::TransportClosed) => {
                warn!(peer, "device link closed mid-frame");
                return Err(FrameError::TransportClosed.into());
            }
            Err(err) => return Err(err.into()),
        };

        let reply = handle.block_on(async {
            match tokio::time::timeout(timeout, answer(dispatcher, &frame.payload)).await {
                Ok(reply) => reply,
                Err(_) => {
                    warn!(peer, ?timeout, "request timed out");
                    cap_reply(
                        RpcReply::Error {
                            error: format!("request timed out after {timeout:?}"),
                        }
                        .to_vec(),
                    )
                }
            }
        });
        writer.write_payload(&reply)?;
        stats.requests += 1;
    }
}
