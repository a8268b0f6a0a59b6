use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use agentwire_rpc::RpcDispatcher;
use agentwire_transport::UnixDomainSocket;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::session::serve_session;

/// Default socket path for desktop device simulation.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/agentwire.sock";

/// Accepts simulated devices on a Unix domain socket.
///
/// Each connection gets its own session task; sessions share the dispatcher
/// but nothing else, so one device disconnecting never affects another.
pub struct SocketServer {
    socket: UnixDomainSocket,
    dispatcher: RpcDispatcher,
    next_device_id: AtomicU64,
}

impl SocketServer {
    /// Bind to a Unix domain socket path.
    pub fn bind(path: impl AsRef<Path>, dispatcher: RpcDispatcher) -> Result<Self> {
        let socket = UnixDomainSocket::bind(path)?;
        Ok(Self {
            socket,
            dispatcher,
            next_device_id: AtomicU64::new(1),
        })
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        self.socket.path()
    }

    /// Accept devices until `shutdown` fires, then wait for open sessions to end.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut sessions = JoinSet::new();
        info!(path = ?self.path(), "waiting for devices");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.socket.accept() => {
                    let stream = match accepted {
                        Ok(stream) => stream,
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let id = self.next_device_id.fetch_add(1, Ordering::Relaxed);
                    let peer = format!("device-{id}");
                    if let Some((uid, _gid, pid)) = stream.peer_credentials() {
                        info!(peer = %peer, peer_uid = uid, peer_pid = ?pid, "accepted device");
                    }
                    let dispatcher = self.dispatcher.clone();
                    let token = shutdown.child_token();
                    sessions.spawn(async move {
                        if let Err(err) = serve_session(stream, &dispatcher, &peer, token).await {
                            warn!(peer = %peer, error = %err, "device session ended with error");
                        }
                    });
                }
                Some(done) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(err) = done {
                        warn!(error = %err, "device session task failed");
                    }
                }
            }
        }

        while sessions.join_next().await.is_some() {}
        info!("socket server stopped");
        Ok(())
    }
}
