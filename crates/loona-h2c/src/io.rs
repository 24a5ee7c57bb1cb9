use std::{
    cmp, io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Buf, Bytes};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pin_project! {
    /// Replays some bytes that were already read off `inner` before reading
    /// from it again. Writes go straight to `inner`.
    ///
    /// Used for bytes sniffed at connection start, bytes an HTTP/1.1 parser
    /// read past the end of an upgrade request, and frames synthesized for an
    /// HTTP/2 engine.
    #[derive(Debug)]
    pub struct Rewind<T> {
        pre: Option<Bytes>,
        #[pin]
        inner: T,
    }
}

impl<T> Rewind<T> {
    pub fn new_buffered(inner: T, pre: Bytes) -> Self {
        Self {
            pre: (!pre.is_empty()).then_some(pre),
            inner,
        }
    }

    /// Bytes that have not been replayed yet
    pub fn pending(&self) -> &[u8] {
        self.pre.as_deref().unwrap_or_default()
    }

    /// Gives back the inner I/O object, along with any bytes that were not
    /// replayed yet.
    pub fn into_inner(self) -> (T, Bytes) {
        (self.inner, self.pre.unwrap_or_default())
    }
}

impl<T: AsyncRead> AsyncRead for Rewind<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();

        if let Some(mut pre) = this.pre.take() {
            if !pre.is_empty() {
                let n = cmp::min(pre.len(), buf.remaining());
                buf.put_slice(&pre[..n]);
                pre.advance(n);

                if !pre.is_empty() {
                    *this.pre = Some(pre);
                }
                return Poll::Ready(Ok(()));
            }
        }

        this.inner.poll_read(cx, buf)
    }
}

impl<T: AsyncWrite> AsyncWrite for Rewind<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
