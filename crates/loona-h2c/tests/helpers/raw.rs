//! Speaking h2c by hand over a plain TCP stream, for what hyper's client
//! can't do: upgrading from HTTP/1.1.

use bytes::{Buf, BytesMut};
use eyre::eyre;
use loona_h2c::frame::{
    DataFlags, FrameHeader, HeadersFlags, PingFlags, RawFrameType, StreamId, PREFACE,
};
use pretty_assertions::assert_eq;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

pub(crate) const CURL_SETTINGS: &str = "AAMAAABkAARAAAAAAAIAAAAA";
pub(crate) const PING_PAYLOAD: &[u8; 8] = b"h2cping!";

#[derive(Default, Debug)]
pub(crate) struct Seen {
    pub(crate) status: Option<String>,
    pub(crate) body: Vec<u8>,
    pub(crate) end_stream: bool,
    pub(crate) settings: usize,
    pub(crate) settings_acks: usize,
    pub(crate) ping_ack: bool,
    pub(crate) goaway: bool,
}

/// A connection-level frame, as a client would send it
pub(crate) fn frame(ty: RawFrameType, payload: &[u8]) -> Vec<u8> {
    frame_with_flags(ty, 0, payload)
}

fn frame_with_flags(ty: RawFrameType, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![];
    FrameHeader::new(ty, flags, StreamId::CONNECTION)
        .with_len(payload.len() as _)
        .write_into(&mut out)
        .unwrap();
    out.extend_from_slice(payload);
    out
}

/// An `Upgrade: h2c` request for `path`
pub(crate) fn upgrade_request(addr: std::net::SocketAddr, path: &str) -> Vec<u8> {
    format!(
        "GET {path} HTTP/1.1\r\n\
         host: {addr}\r\n\
         connection: Upgrade, HTTP2-Settings\r\n\
         upgrade: h2c\r\n\
         http2-settings: {CURL_SETTINGS}\r\n\
         \r\n"
    )
    .into_bytes()
}

/// What a client sends once it decided to speak HTTP/2: the preface, its
/// SETTINGS, and a PING we can wait for.
pub(crate) fn client_start() -> Vec<u8> {
    let mut out = PREFACE.to_vec();
    out.extend(frame(RawFrameType::Settings, &[]));
    out.extend(frame(RawFrameType::Ping, PING_PAYLOAD));
    out
}

/// Reads the raw `101` response head, returning whatever came after it
pub(crate) async fn read_response_head(stream: &mut TcpStream) -> eyre::Result<(u16, BytesMut)> {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(eyre!("connection closed before the response head"));
        }

        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut res = httparse::Response::new(&mut headers);
        if let httparse::Status::Complete(len) = res.parse(&buf[..])? {
            let code = res.code.ok_or_else(|| eyre!("no status code"))?;
            let has = |name: &str, value: &str| {
                res.headers.iter().any(|h| {
                    h.name.eq_ignore_ascii_case(name)
                        && h.value.eq_ignore_ascii_case(value.as_bytes())
                })
            };
            if code == 101 {
                assert!(has("connection", "upgrade"));
                assert!(has("upgrade", "h2c"));
            }
            buf.advance(len);
            return Ok((code, buf));
        }
    }
}

/// Reads HTTP/2 frames until stream 1 is complete and our PING came back.
/// PINGs from the server are answered: hyper waits for that before closing
/// a connection gracefully.
pub(crate) async fn read_frames(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
) -> eyre::Result<Seen> {
    let mut seen = Seen::default();
    let mut decoder = loona_hpack::Decoder::new();

    while !(seen.end_stream && seen.ping_ack) {
        let (header, header_len) = match FrameHeader::parse(&buf[..]) {
            Ok((rest, header)) if rest.len() >= header.len as usize => {
                (header, buf.len() - rest.len())
            }
            _ => {
                if stream.read_buf(buf).await? == 0 {
                    return Err(eyre!("connection closed mid-session: {seen:?}"));
                }
                continue;
            }
        };
        buf.advance(header_len);
        let payload = buf.split_to(header.len as usize);

        match header.frame_type() {
            Some(RawFrameType::Settings) => {
                if header.is_settings_ack() {
                    seen.settings_acks += 1;
                } else {
                    seen.settings += 1;
                }
            }
            Some(RawFrameType::Ping) if header.flags & PingFlags::Ack as u8 != 0 => {
                assert_eq!(&payload[..], &PING_PAYLOAD[..]);
                // the ACK for the client's own SETTINGS comes first
                assert_eq!(seen.settings_acks, 1);
                seen.ping_ack = true;
            }
            Some(RawFrameType::Ping) => pong(stream, &payload).await?,
            Some(RawFrameType::Headers) => {
                assert_eq!(header.stream_id, StreamId::UPGRADE);
                assert_ne!(header.flags & HeadersFlags::EndHeaders as u8, 0);
                for (name, value) in decoder.decode(&payload[..])? {
                    if name == b":status" {
                        seen.status = Some(String::from_utf8(value)?);
                    }
                }
                seen.end_stream |= header.flags & HeadersFlags::EndStream as u8 != 0;
            }
            Some(RawFrameType::Data) => {
                assert_eq!(header.stream_id, StreamId::UPGRADE);
                seen.body.extend_from_slice(&payload[..]);
                seen.end_stream |= header.flags & DataFlags::EndStream as u8 != 0;
            }
            Some(RawFrameType::GoAway) => {
                seen.goaway = true;
            }
            _ => {}
        }
    }

    Ok(seen)
}

async fn pong(stream: &mut TcpStream, payload: &[u8]) -> eyre::Result<()> {
    let ack = frame_with_flags(RawFrameType::Ping, PingFlags::Ack as u8, payload);
    stream.write_all(&ack).await?;
    Ok(())
}

/// Keeps answering PINGs until the server closes the connection. Returns
/// whether a GOAWAY was seen on the way.
pub(crate) async fn read_until_closed(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
) -> eyre::Result<bool> {
    let mut goaway = false;
    loop {
        let (header, header_len) = match FrameHeader::parse(&buf[..]) {
            Ok((rest, header)) if rest.len() >= header.len as usize => {
                (header, buf.len() - rest.len())
            }
            _ => {
                if stream.read_buf(buf).await? == 0 {
                    return Ok(goaway);
                }
                continue;
            }
        };
        buf.advance(header_len);
        let payload = buf.split_to(header.len as usize);

        match header.frame_type() {
            Some(RawFrameType::Ping) if header.flags & PingFlags::Ack as u8 == 0 => {
                pong(stream, &payload).await?
            }
            Some(RawFrameType::GoAway) => goaway = true,
            _ => {}
        }
    }
}
