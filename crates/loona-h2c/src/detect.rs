//! Decides whether a connection, or a request on it, should be handed over to
//! the HTTP/2 engine.

use std::{io, time::Duration};

use http::{header, request, HeaderMap, Method, Version};
use pretty_hex::PrettyHex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use crate::{
    frame::{PREFACE, PREFACE_TAIL},
    primer::SettingsPrimer,
};

/// The header carrying the client's settings in an `Upgrade: h2c` request
pub const HTTP2_SETTINGS: header::HeaderName = header::HeaderName::from_static("http2-settings");

/// What to do with a connection, or with a request on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Keep speaking HTTP/1.1
    NotUpgrade,

    /// The client opened with the HTTP/2 connection preface
    PriorKnowledge,

    /// The client asked to switch to h2c and declared these settings
    UpgradeHeader(SettingsPrimer),
}

/// Looks at the first bytes of a fresh connection. Returns `None` while the
/// bytes seen so far are a strict prefix of the connection preface.
pub fn sniff(prelude: &[u8]) -> Option<Classification> {
    let n = std::cmp::min(prelude.len(), PREFACE.len());
    if prelude[..n] != PREFACE[..n] {
        Some(Classification::NotUpgrade)
    } else if n == PREFACE.len() {
        Some(Classification::PriorKnowledge)
    } else {
        None
    }
}

/// Reads just enough of `io` to tell a prior-knowledge HTTP/2 client from
/// anything else. The bytes read end up in `buf`, which the caller must
/// replay. Never reads past the connection preface.
pub async fn sniff_connection<I>(io: &mut I, buf: &mut Vec<u8>) -> io::Result<Classification>
where
    I: AsyncRead + Unpin,
{
    loop {
        if let Some(classification) = sniff(buf) {
            trace!(
                ?classification,
                "sniffed {:?}",
                buf.hex_dump()
            );
            return Ok(classification);
        }

        let mut chunk = [0u8; PREFACE.len()];
        let wanted = PREFACE.len() - buf.len();
        let n = io.read(&mut chunk[..wanted]).await?;
        if n == 0 {
            debug!(read = buf.len(), "EOF while sniffing for the connection preface");
            return Ok(Classification::NotUpgrade);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Like [sniff_connection], giving up on prior knowledge (and treating the
/// connection as HTTP/1.1) if the preface doesn't show up within `timeout`.
pub async fn sniff_connection_timeout<I>(
    io: &mut I,
    buf: &mut Vec<u8>,
    timeout: Duration,
) -> io::Result<Classification>
where
    I: AsyncRead + Unpin,
{
    match tokio::time::timeout(timeout, sniff_connection(io, buf)).await {
        Ok(res) => res,
        Err(_) => {
            debug!(read = buf.len(), "timed out sniffing for the connection preface");
            Ok(Classification::NotUpgrade)
        }
    }
}

/// Classifies an HTTP/1.1 request head. `unread` holds whatever the HTTP/1.1
/// parser read past the end of it, if known.
///
/// Never looks at the body, never fails: anything malformed about an upgrade
/// attempt just keeps the request on HTTP/1.1.
pub fn classify(head: &request::Parts, unread: &[u8]) -> Classification {
    if unread.starts_with(PREFACE) || (is_preface_request(head) && unread.starts_with(PREFACE_TAIL))
    {
        return Classification::PriorKnowledge;
    }

    if !is_safe_method(&head.method) {
        return Classification::NotUpgrade;
    }

    if has_body(&head.headers) {
        debug!("not upgrading: request has a body");
        return Classification::NotUpgrade;
    }

    let has_upgrade_token = has_token(&head.headers, header::CONNECTION, "upgrade");
    let has_settings_token = has_token(&head.headers, header::CONNECTION, "http2-settings");
    if !(has_upgrade_token && has_settings_token) {
        return Classification::NotUpgrade;
    }

    let mut upgrades = head.headers.get_all(header::UPGRADE).iter();
    match (upgrades.next(), upgrades.next()) {
        (Some(upgrade), None) if upgrade.as_bytes().trim_ascii().eq_ignore_ascii_case(b"h2c") => {}
        _ => return Classification::NotUpgrade,
    }

    let mut values = head.headers.get_all(&HTTP2_SETTINGS).iter();
    let value = match (values.next(), values.next()) {
        (Some(value), None) => value,
        _ => {
            debug!("not upgrading: need exactly one HTTP2-Settings header");
            return Classification::NotUpgrade;
        }
    };

    match SettingsPrimer::decode(value.as_bytes().trim_ascii()) {
        Ok(primer) => {
            debug!(?primer, "h2c upgrade requested");
            Classification::UpgradeHeader(primer)
        }
        Err(e) => {
            debug!(%e, "not upgrading: bad HTTP2-Settings");
            Classification::NotUpgrade
        }
    }
}

fn is_preface_request(head: &request::Parts) -> bool {
    head.method.as_str() == "PRI" && head.uri == "*" && head.version == Version::HTTP_2
}

fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn has_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    headers
        .get_all(header::CONTENT_LENGTH)
        .iter()
        .any(|v| v.as_bytes().trim_ascii() != b"0")
}

/// Whether a comma-separated header contains `token`, across all its lines
fn has_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers.get_all(name).iter().any(|value| {
        value
            .as_bytes()
            .split(|&b| b == b',')
            .any(|t| t.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
    })
}
