use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A connected device stream implementing `AsyncRead + AsyncWrite`.
///
/// This is the I/O type handed out by [`crate::UnixDomainSocket::accept`]. One
/// stream carries one device session; it is never shared between sessions.
pub struct DeviceStream {
    inner: DeviceStreamInner,
}

enum DeviceStreamInner {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl DeviceStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: tokio::net::UnixStream) -> Self {
        Self {
            inner: DeviceStreamInner::Unix(stream),
        }
    }

    /// Credentials of the connected peer as `(uid, gid, pid)`.
    ///
    /// Returns `None` when the platform does not expose them.
    pub fn peer_credentials(&self) -> Option<(u32, u32, Option<i32>)> {
        match &self.inner {
            #[cfg(unix)]
            DeviceStreamInner::Unix(stream) => stream
                .peer_cred()
                .ok()
                .map(|cred| (cred.uid(), cred.gid(), cred.pid())),
        }
    }

    /// Link name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            DeviceStreamInner::Unix(_) => "unix-domain-socket",
        }
    }
}

impl AsyncRead for DeviceStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            DeviceStreamInner::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for DeviceStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            DeviceStreamInner::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            DeviceStreamInner::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            DeviceStreamInner::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStream")
            .field("type", &self.transport_name())
            .finish()
    }
}
