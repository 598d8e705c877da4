//! Relayed byte stream to a device port

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::codec::Framed;

use usbmux_protocol::FrameCodec;

/// Raw duplex stream to a device port, returned by a successful `Connect`
///
/// Once the daemon accepts the connection no further framing happens on the
/// socket. Bytes the frame reader had already buffered past the result frame
/// are handed out first.
#[derive(Debug)]
pub struct DeviceStream<S> {
    io: S,
    pending: Bytes,
}

impl<S> DeviceStream<S> {
    pub(crate) fn from_framed(framed: Framed<S, FrameCodec>) -> Self {
        let parts = framed.into_parts();
        if !parts.read_buf.is_empty() {
            tracing::trace!(bytes = parts.read_buf.len(), "Replaying bytes read ahead of connect result");
        }
        Self {
            io: parts.io,
            pending: parts.read_buf.freeze(),
        }
    }

    /// Bytes received but not yet read
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn get_ref(&self) -> &S {
        &self.io
    }

    /// Take the socket back, along with any unread bytes
    pub fn into_parts(self) -> (S, Bytes) {
        (self.io, self.pending)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for DeviceStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.remaining());
            let chunk = self.pending.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DeviceStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}
