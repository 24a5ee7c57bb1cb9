//! Hands a raw connection over to the HTTP/2 engine for the rest of its life.

use std::{io, sync::Arc};

use bytes::Bytes;
use http::{header, request, HeaderName, HeaderValue};
use pretty_hex::PrettyHex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, trace};

use crate::{
    context::ConnContext,
    engine::Engine,
    error::SpliceError,
    frame::{write_header_block, StreamId, DEFAULT_MAX_FRAME_SIZE, PREFACE},
    io::Rewind,
    primer::SettingsPrimer,
    swallow::SettingsAckSwallow,
};

/// A connection taken away from the HTTP/1.1 server, along with whatever it
/// had already read from it but not parsed.
#[derive(Debug)]
pub struct Hijacked<T> {
    io: T,
    read_buf: Bytes,
}

impl<T> Hijacked<T> {
    pub fn new(io: T, read_buf: Bytes) -> Self {
        Self { io, read_buf }
    }

    pub fn into_parts(self) -> (T, Bytes) {
        (self.io, self.read_buf)
    }
}

/// How a connection gets to the engine
#[derive(Debug)]
pub enum Handoff {
    /// The connection (with its read buffer replayed) starts with the client
    /// connection preface
    PriorKnowledge,

    /// The client sent `Upgrade: h2c` and was answered with `101 Switching
    /// Protocols`. Its request continues as stream 1.
    Upgrade {
        primer: SettingsPrimer,
        head: request::Parts,
    },
}

/// Moves connections into an [Engine].
pub struct Splicer<E> {
    engine: Arc<E>,
}

impl<E> Clone for Splicer<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<E: Engine> Splicer<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    /// Serves `conn` with the engine. Only returns once the HTTP/2 session
    /// is over, or when the host shuts down before an upgraded client sent
    /// its connection preface.
    pub async fn splice<T>(
        &self,
        conn: Hijacked<T>,
        handoff: Handoff,
        ctx: ConnContext,
    ) -> Result<(), SpliceError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (io, read_buf) = conn.into_parts();
        let mut io = Rewind::new_buffered(io, read_buf);

        match handoff {
            Handoff::PriorKnowledge => {
                debug!(conn_id = ctx.id(), "splicing prior-knowledge connection");
                self.engine.serve(io, ctx).await.map_err(SpliceError::Engine)
            }
            Handoff::Upgrade { primer, head } => {
                let prelude = upgrade_prelude(&primer, &head)?;
                tokio::select! {
                    res = expect_client_preface(&mut io) => res?,
                    _ = ctx.cancelled() => {
                        debug!(
                            conn_id = ctx.id(),
                            "shutting down before the client sent its preface"
                        );
                        return Ok(());
                    }
                }

                debug!(
                    conn_id = ctx.id(),
                    prelude_len = prelude.len(),
                    "splicing upgraded connection"
                );
                let io = Rewind::new_buffered(SettingsAckSwallow::new(io), prelude);
                self.engine.serve(io, ctx).await.map_err(SpliceError::Engine)
            }
        }
    }
}

async fn expect_client_preface<T>(io: &mut T) -> Result<(), SpliceError>
where
    T: AsyncRead + Unpin,
{
    let mut buf = [0u8; PREFACE.len()];
    io.read_exact(&mut buf).await?;
    if buf[..] != PREFACE[..] {
        trace!("expected client preface, got {:?}", buf.hex_dump());
        return Err(SpliceError::BadClientPreface);
    }
    Ok(())
}

/// What the engine reads first on an upgraded connection: the connection
/// preface, a SETTINGS frame with the client's `HTTP2-Settings`, then the
/// upgrade request itself, as a complete request on stream 1.
///
/// The engine has not announced its own settings when it reads these, so
/// frames stick to the default maximum frame size.
pub fn upgrade_prelude(primer: &SettingsPrimer, head: &request::Parts) -> io::Result<Bytes> {
    let block = encode_request_head(head)?;

    let mut out = Vec::with_capacity(PREFACE.len() + 64 + block.len());
    out.extend_from_slice(PREFACE);
    primer.write_frame(&mut out)?;
    write_header_block(
        StreamId::UPGRADE,
        &block,
        true,
        DEFAULT_MAX_FRAME_SIZE,
        &mut out,
    )?;
    Ok(out.into())
}

fn encode_request_head(head: &request::Parts) -> io::Result<Vec<u8>> {
    let authority = head
        .headers
        .get(header::HOST)
        .map(|host| host.as_bytes())
        .or_else(|| head.uri.authority().map(|a| a.as_str().as_bytes()));
    let path = head
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut headers: Vec<(&[u8], &[u8])> = Vec::with_capacity(head.headers.len() + 4);
    headers.push((b":method", head.method.as_str().as_bytes()));
    headers.push((b":scheme", b"http"));
    if let Some(authority) = authority {
        headers.push((b":authority", authority));
    }
    headers.push((b":path", path.as_bytes()));

    for (name, value) in head.headers.iter() {
        if is_connection_specific(&head.headers, name, value) {
            trace!(%name, "dropping connection-specific header");
            continue;
        }
        headers.push((name.as_str().as_bytes(), value.as_bytes()));
    }

    let mut block = Vec::new();
    loona_hpack::Encoder::new().encode_into(headers, &mut block)?;
    Ok(block)
}

/// Headers that only make sense for one HTTP/1.1 hop, and which HTTP/2
/// forbids, cf. <https://httpwg.org/specs/rfc9113.html#ConnectionSpecific>
fn is_connection_specific(
    headers: &http::HeaderMap,
    name: &HeaderName,
    value: &HeaderValue,
) -> bool {
    if *name == header::TE {
        return !value.as_bytes().eq_ignore_ascii_case(b"trailers");
    }

    if matches!(
        name.as_str(),
        "connection"
            | "upgrade"
            | "http2-settings"
            | "keep-alive"
            | "proxy-connection"
            | "transfer-encoding"
            | "host"
    ) {
        return true;
    }

    // anything the client listed in `Connection` is hop-by-hop too
    headers.get_all(header::CONNECTION).iter().any(|v| {
        v.as_bytes()
            .split(|&b| b == b',')
            .any(|t| t.trim_ascii().eq_ignore_ascii_case(name.as_str().as_bytes()))
    })
}
