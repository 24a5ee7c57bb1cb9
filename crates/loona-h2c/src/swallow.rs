//! A byte filter that drops the first SETTINGS ACK an HTTP/2 engine writes.
//!
//! When a connection is upgraded through `Upgrade: h2c`, the client's settings
//! travel in the `HTTP2-Settings` request header. The engine gets them as a
//! synthesized SETTINGS frame and acknowledges it, but the client never sent
//! that frame and must not see the acknowledgement.

use std::{
    io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use bytes::{Buf, BytesMut};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, trace};

use crate::frame::{FrameHeader, FRAME_HEADER_LEN};

#[derive(Debug, Clone, Copy)]
enum State {
    /// Collecting the next frame header
    Header {
        buf: [u8; FRAME_HEADER_LEN],
        filled: usize,
    },

    /// Passing through the payload of a frame we kept
    Forward { remaining: u32 },

    /// Dropping the payload of the acknowledgement. A well-formed one has
    /// none, but this keeps framing intact if it does.
    Swallow { remaining: u32 },

    /// Acknowledgement swallowed, everything else goes through untouched
    Done,
}

impl State {
    fn header() -> Self {
        State::Header {
            buf: [0u8; FRAME_HEADER_LEN],
            filled: 0,
        }
    }
}

/// The framing state machine behind [SettingsAckSwallow], independent of any
/// I/O.
#[derive(Debug, Clone)]
pub struct AckFilter {
    state: State,
}

impl Default for AckFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl AckFilter {
    pub fn new() -> Self {
        Self {
            state: State::header(),
        }
    }

    /// Whether the acknowledgement was seen and dropped: from here on, the
    /// filter forwards everything.
    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Whether some bytes of a frame header are held back, waiting for the
    /// rest of it.
    pub fn has_partial_header(&self) -> bool {
        matches!(self.state, State::Header { filled, .. } if filled > 0)
    }

    /// Runs `input` through the filter, appending whatever must reach the
    /// peer to `out`, in order.
    pub fn feed(&mut self, mut input: &[u8], out: &mut BytesMut) {
        while !input.is_empty() {
            let next = match &mut self.state {
                State::Done => {
                    out.extend_from_slice(input);
                    return;
                }
                State::Forward { remaining } => {
                    let n = std::cmp::min(*remaining as usize, input.len());
                    out.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    *remaining -= n as u32;
                    (*remaining == 0).then(State::header)
                }
                State::Swallow { remaining } => {
                    let n = std::cmp::min(*remaining as usize, input.len());
                    input = &input[n..];
                    *remaining -= n as u32;
                    (*remaining == 0).then_some(State::Done)
                }
                State::Header { buf, filled } => {
                    let n = std::cmp::min(FRAME_HEADER_LEN - *filled, input.len());
                    buf[*filled..*filled + n].copy_from_slice(&input[..n]);
                    *filled += n;
                    input = &input[n..];

                    if *filled < FRAME_HEADER_LEN {
                        None
                    } else {
                        let header = FrameHeader::from_array(buf);
                        if header.is_settings_ack() {
                            debug!("swallowing SETTINGS ACK for the h2c upgrade settings");
                            Some(match header.len {
                                0 => State::Done,
                                remaining => State::Swallow { remaining },
                            })
                        } else {
                            trace!(?header, "forwarding frame");
                            out.extend_from_slice(&buf[..]);
                            Some(match header.len {
                                0 => State::header(),
                                remaining => State::Forward { remaining },
                            })
                        }
                    }
                }
            };

            if let Some(next) = next {
                self.state = next;
            }
        }
    }
}

fn partial_header_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        "flushed with a partial HTTP/2 frame header pending",
    )
}

pin_project! {
    /// Sits between an HTTP/2 engine and the connection it writes to,
    /// dropping the first SETTINGS ACK and forwarding every other byte as-is.
    ///
    /// Writes always accept the whole buffer. Flushing while a frame header
    /// is only partially written is an error: the engine always writes whole
    /// frames before flushing. Reads pass straight through.
    #[derive(Debug)]
    pub struct SettingsAckSwallow<W> {
        filter: AckFilter,
        pending: BytesMut,
        #[pin]
        inner: W,
    }
}

impl<W> SettingsAckSwallow<W> {
    pub fn new(inner: W) -> Self {
        Self {
            filter: AckFilter::new(),
            pending: BytesMut::new(),
            inner,
        }
    }

    pub fn is_done(&self) -> bool {
        self.filter.is_done()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: io::Write> io::Write for SettingsAckSwallow<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.filter.is_done() && self.pending.is_empty() {
            return self.inner.write(buf);
        }

        self.filter.feed(buf, &mut self.pending);
        let pending = self.pending.split();
        self.inner.write_all(&pending)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.filter.has_partial_header() {
            return Err(partial_header_error());
        }
        self.inner.flush()
    }
}

fn poll_drain<W: AsyncWrite>(
    mut inner: Pin<&mut W>,
    pending: &mut BytesMut,
    cx: &mut Context<'_>,
) -> Poll<io::Result<()>> {
    while !pending.is_empty() {
        let n = ready!(inner.as_mut().poll_write(cx, &pending[..]))?;
        if n == 0 {
            return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
        }
        pending.advance(n);
    }
    Poll::Ready(Ok(()))
}

impl<W: AsyncWrite> AsyncWrite for SettingsAckSwallow<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut this = self.project();

        if !this.pending.is_empty() {
            ready!(poll_drain(this.inner.as_mut(), this.pending, cx))?;
        }
        if this.filter.is_done() {
            return this.inner.poll_write(cx, buf);
        }

        this.filter.feed(buf, this.pending);
        if let Poll::Ready(Err(e)) = poll_drain(this.inner.as_mut(), this.pending, cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        ready!(poll_drain(this.inner.as_mut(), this.pending, cx))?;
        if this.filter.has_partial_header() {
            return Poll::Ready(Err(partial_header_error()));
        }
        this.inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        ready!(poll_drain(this.inner.as_mut(), this.pending, cx))?;
        this.inner.poll_shutdown(cx)
    }
}

impl<W: AsyncRead> AsyncRead for SettingsAckSwallow<W> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}
