//! Just enough HTTP/2 framing to splice a connection into an HTTP/2 engine.
//!
//! HTTP/2 <https://httpwg.org/specs/rfc9113.html>

use std::fmt;

use byteorder::{BigEndian, WriteBytesExt};
use enumflags2::{bitflags, BitFlags};
use nom::{
    number::streaming::{be_u16, be_u24, be_u32, be_u8},
    sequence::tuple,
    IResult,
};

/// This is sent by h2 clients after switching protocols, or right away when
/// doing h2c with prior knowledge.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// What an HTTP/1.1 parser leaves behind after reading the preface as a
/// `PRI * HTTP/2.0` request.
pub const PREFACE_TAIL: &[u8] = b"SM\r\n\r\n";

/// See <https://httpwg.org/specs/rfc9113.html#FrameHeader>
pub const FRAME_HEADER_LEN: usize = 9;

/// Initial value of SETTINGS_MAX_FRAME_SIZE, also its smallest legal value.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 1 << 14;

/// Largest legal value of SETTINGS_MAX_FRAME_SIZE.
pub const MAX_FRAME_SIZE_LIMIT: u32 = (1 << 24) - 1;

/// Largest flow-control window, cf. <https://httpwg.org/specs/rfc9113.html#InitialWindowSize>
pub const MAX_WINDOW_SIZE: u32 = (1 << 31) - 1;

/// See <https://httpwg.org/specs/rfc9113.html#FrameTypes>
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFrameType {
    Data = 0x00,
    Headers = 0x01,
    Priority = 0x02,
    RstStream = 0x03,
    Settings = 0x04,
    PushPromise = 0x05,
    Ping = 0x06,
    GoAway = 0x07,
    WindowUpdate = 0x08,
    Continuation = 0x09,
}

impl RawFrameType {
    pub fn from_repr(ty: u8) -> Option<Self> {
        Some(match ty {
            0x00 => Self::Data,
            0x01 => Self::Headers,
            0x02 => Self::Priority,
            0x03 => Self::RstStream,
            0x04 => Self::Settings,
            0x05 => Self::PushPromise,
            0x06 => Self::Ping,
            0x07 => Self::GoAway,
            0x08 => Self::WindowUpdate,
            0x09 => Self::Continuation,
            _ => return None,
        })
    }

    pub fn repr(self) -> u8 {
        self as u8
    }
}

/// See <https://httpwg.org/specs/rfc9113.html#DATA>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataFlags {
    Padded = 0x08,
    EndStream = 0x01,
}

/// See <https://httpwg.org/specs/rfc9113.html#HEADERS>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeadersFlags {
    Priority = 0x20,
    Padded = 0x08,
    EndHeaders = 0x04,
    EndStream = 0x01,
}

/// See <https://httpwg.org/specs/rfc9113.html#SETTINGS>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SettingsFlags {
    Ack = 0x01,
}

/// See <https://httpwg.org/specs/rfc9113.html#PING>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PingFlags {
    Ack = 0x01,
}

/// See <https://httpwg.org/specs/rfc9113.html#CONTINUATION>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContinuationFlags {
    EndHeaders = 0x04,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub(crate) u32);

impl StreamId {
    /// Stream ID used for connection control frames
    pub const CONNECTION: Self = Self(0);

    /// The stream an `Upgrade: h2c` request continues on, cf.
    /// <https://www.rfc-editor.org/rfc/rfc7540#section-3.2>
    pub const UPGRADE: Self = Self(1);

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// See <https://httpwg.org/specs/rfc9113.html#FrameHeader>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub len: u32,
    pub ty: u8,
    pub flags: u8,
    pub stream_id: StreamId,
}

impl FrameHeader {
    /// Create a new frame header with the given type and stream ID.
    pub fn new(ty: RawFrameType, flags: u8, stream_id: StreamId) -> Self {
        Self {
            len: 0,
            ty: ty.repr(),
            flags,
            stream_id,
        }
    }

    /// Set the frame's payload length.
    pub fn with_len(mut self, len: u32) -> Self {
        self.len = len;
        self
    }

    pub fn frame_type(&self) -> Option<RawFrameType> {
        RawFrameType::from_repr(self.ty)
    }

    pub fn is_settings_ack(&self) -> bool {
        self.frame_type() == Some(RawFrameType::Settings)
            && BitFlags::<SettingsFlags>::from_bits_truncate(self.flags)
                .contains(SettingsFlags::Ack)
    }

    /// Parse a frame header. The reserved bit is ignored, as receivers must.
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, (len, ty, flags, stream_id)) = tuple((be_u24, be_u8, be_u8, be_u32))(i)?;
        Ok((
            i,
            Self {
                len,
                ty,
                flags,
                stream_id: StreamId(stream_id & 0x7fff_ffff),
            },
        ))
    }

    pub(crate) fn from_array(raw: &[u8; FRAME_HEADER_LEN]) -> Self {
        match Self::parse(&raw[..]) {
            Ok((_, header)) => header,
            Err(_) => unreachable!("nine bytes always hold a frame header"),
        }
    }

    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        w.write_u24::<BigEndian>(self.len)?;
        w.write_u8(self.ty)?;
        w.write_u8(self.flags)?;
        w.write_u32::<BigEndian>(self.stream_id.0)?;
        Ok(())
    }
}

/// See <https://httpwg.org/specs/rfc9113.html#SettingValues>
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    HeaderTableSize = 0x01,
    EnablePush = 0x02,
    MaxConcurrentStreams = 0x03,
    InitialWindowSize = 0x04,
    MaxFrameSize = 0x05,
    MaxHeaderListSize = 0x06,
    /// cf. <https://www.rfc-editor.org/rfc/rfc8441#section-3>
    EnableConnectProtocol = 0x08,
}

impl Setting {
    pub fn from_id(id: u16) -> Option<Self> {
        Some(match id {
            0x01 => Self::HeaderTableSize,
            0x02 => Self::EnablePush,
            0x03 => Self::MaxConcurrentStreams,
            0x04 => Self::InitialWindowSize,
            0x05 => Self::MaxFrameSize,
            0x06 => Self::MaxHeaderListSize,
            0x08 => Self::EnableConnectProtocol,
            _ => return None,
        })
    }

    pub fn id(self) -> u16 {
        self as u16
    }

    /// Checks a value against RFC 9113 section 6.5.2
    pub fn validate(self, value: u32) -> Result<(), SettingsError> {
        match self {
            Setting::EnablePush | Setting::EnableConnectProtocol if value > 1 => {
                Err(SettingsError::InvalidBoolean {
                    setting: self,
                    actual: value,
                })
            }
            Setting::InitialWindowSize if value > MAX_WINDOW_SIZE => {
                Err(SettingsError::InitialWindowSizeTooLarge { actual: value })
            }
            Setting::MaxFrameSize
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_LIMIT).contains(&value) =>
            {
                Err(SettingsError::MaxFrameSizeOutOfRange { actual: value })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("settings payload length {len} is not a multiple of 6")]
    InvalidLength { len: usize },

    #[error("{setting:?} must be 0 or 1, got {actual}")]
    InvalidBoolean { setting: Setting, actual: u32 },

    #[error("initial window size {actual} is larger than 2^31-1")]
    InitialWindowSizeTooLarge { actual: u32 },

    #[error("max frame size {actual} is outside of 16384..=16777215")]
    MaxFrameSizeOutOfRange { actual: u32 },
}

fn setting_record(i: &[u8]) -> IResult<&[u8], (u16, u32)> {
    tuple((be_u16, be_u32))(i)
}

/// Walks a SETTINGS payload, calling `cb` with each identifier/value pair in
/// order. Unknown identifiers are passed along too: callers ignore them.
pub fn parse_settings(
    payload: &[u8],
    mut cb: impl FnMut(u16, u32) -> Result<(), SettingsError>,
) -> Result<(), SettingsError> {
    if payload.len() % 6 != 0 {
        return Err(SettingsError::InvalidLength { len: payload.len() });
    }

    let mut rest = payload;
    while !rest.is_empty() {
        let (next, (id, value)) = setting_record(rest)
            .map_err(|_| SettingsError::InvalidLength { len: payload.len() })?;
        cb(id, value)?;
        rest = next;
    }
    Ok(())
}

/// Writes a (non-ACK) SETTINGS frame carrying `payload` verbatim.
pub fn write_settings_frame(payload: &[u8], out: &mut Vec<u8>) -> std::io::Result<()> {
    FrameHeader::new(RawFrameType::Settings, 0, StreamId::CONNECTION)
        .with_len(payload.len() as _)
        .write_into(&mut *out)?;
    out.extend_from_slice(payload);
    Ok(())
}

/// Writes an HPACK-encoded header block as one HEADERS frame, followed by as
/// many CONTINUATION frames as `max_frame_size` requires.
pub fn write_header_block(
    stream_id: StreamId,
    block: &[u8],
    end_stream: bool,
    max_frame_size: u32,
    out: &mut Vec<u8>,
) -> std::io::Result<()> {
    let max = max_frame_size.max(DEFAULT_MAX_FRAME_SIZE) as usize;
    let mut chunks = block.chunks(max).peekable();

    let first = chunks.next().unwrap_or_default();
    let mut flags = BitFlags::<HeadersFlags>::empty();
    if end_stream {
        flags |= HeadersFlags::EndStream;
    }
    if chunks.peek().is_none() {
        flags |= HeadersFlags::EndHeaders;
    }
    FrameHeader::new(RawFrameType::Headers, flags.bits(), stream_id)
        .with_len(first.len() as _)
        .write_into(&mut *out)?;
    out.extend_from_slice(first);

    while let Some(chunk) = chunks.next() {
        let mut flags = BitFlags::<ContinuationFlags>::empty();
        if chunks.peek().is_none() {
            flags |= ContinuationFlags::EndHeaders;
        }
        FrameHeader::new(RawFrameType::Continuation, flags.bits(), stream_id)
            .with_len(chunk.len() as _)
            .write_into(&mut *out)?;
        out.extend_from_slice(chunk);
    }

    Ok(())
}
