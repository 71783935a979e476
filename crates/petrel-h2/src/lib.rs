//! HTTP/2 frame parser and base types.
//!
//! HTTP/2 https://httpwg.org/specs/rfc9113.html
//! HTTP semantics https://httpwg.org/specs/rfc9110.html
//!
//! This crate is the stateless half of the petrel client engine: it knows
//! how to turn bytes into typed frames and back, but holds no connection
//! or stream state.

use std::fmt;

use bytes::Bytes;
use enumflags2::{bitflags, BitFlags};
use nom::{
    combinator::map,
    number::streaming::{be_u24, be_u8},
    sequence::tuple,
    IResult,
};
use tracing::debug;

pub use enumflags2;
pub use nom;

/// This is sent by h2 clients after negotiating over ALPN, or when doing h2c.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Size of the fixed frame header, cf. https://httpwg.org/specs/rfc9113.html#FrameHeader
pub const FRAME_HEADER_LEN: usize = 9;

/// Largest payload a frame header can describe (24-bit length field).
pub const MAX_FRAME_PAYLOAD_LEN: usize = (1 << 24) - 1;

pub fn preface(i: &[u8]) -> IResult<&[u8], ()> {
    let (i, _) = nom::bytes::streaming::tag(PREFACE)(i)?;
    Ok((i, ()))
}

/// See https://httpwg.org/specs/rfc9113.html#FrameTypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
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
        match ty {
            0x00 => Some(Self::Data),
            0x01 => Some(Self::Headers),
            0x02 => Some(Self::Priority),
            0x03 => Some(Self::RstStream),
            0x04 => Some(Self::Settings),
            0x05 => Some(Self::PushPromise),
            0x06 => Some(Self::Ping),
            0x07 => Some(Self::GoAway),
            0x08 => Some(Self::WindowUpdate),
            0x09 => Some(Self::Continuation),
            _ => None,
        }
    }

    pub fn repr(self) -> u8 {
        self as u8
    }
}

/// Typed flags for various frame types
#[derive(Debug, Clone, Copy)]
pub enum FrameType {
    Data(BitFlags<DataFlags>),
    Headers(BitFlags<HeadersFlags>),
    Priority,
    RstStream,
    Settings(BitFlags<SettingsFlags>),
    PushPromise(BitFlags<PushPromiseFlags>),
    Ping(BitFlags<PingFlags>),
    GoAway,
    WindowUpdate,
    Continuation(BitFlags<ContinuationFlags>),
    Unknown(EncodedFrameType),
}

/// See https://httpwg.org/specs/rfc9113.html#DATA
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataFlags {
    Padded = 0x08,
    EndStream = 0x01,
}

/// See https://httpwg.org/specs/rfc9113.html#rfc.section.6.2
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeadersFlags {
    Priority = 0x20,
    Padded = 0x08,
    EndHeaders = 0x04,
    EndStream = 0x01,
}

/// See https://httpwg.org/specs/rfc9113.html#SETTINGS
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SettingsFlags {
    Ack = 0x01,
}

/// See https://httpwg.org/specs/rfc9113.html#PUSH_PROMISE
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PushPromiseFlags {
    Padded = 0x08,
    EndHeaders = 0x04,
}

/// See https://httpwg.org/specs/rfc9113.html#PING
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PingFlags {
    Ack = 0x01,
}

/// See https://httpwg.org/specs/rfc9113.html#CONTINUATION
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContinuationFlags {
    EndHeaders = 0x04,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedFrameType {
    pub ty: u8,
    pub flags: u8,
}

impl EncodedFrameType {
    fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, (ty, flags)) = tuple((be_u8, be_u8))(i)?;
        Ok((i, Self { ty, flags }))
    }
}

impl From<(RawFrameType, u8)> for EncodedFrameType {
    fn from((ty, flags): (RawFrameType, u8)) -> Self {
        Self {
            ty: ty.repr(),
            flags,
        }
    }
}

impl FrameType {
    pub fn encode(self) -> EncodedFrameType {
        match self {
            FrameType::Data(f) => (RawFrameType::Data, f.bits()).into(),
            FrameType::Headers(f) => (RawFrameType::Headers, f.bits()).into(),
            FrameType::Priority => (RawFrameType::Priority, 0).into(),
            FrameType::RstStream => (RawFrameType::RstStream, 0).into(),
            FrameType::Settings(f) => (RawFrameType::Settings, f.bits()).into(),
            FrameType::PushPromise(f) => (RawFrameType::PushPromise, f.bits()).into(),
            FrameType::Ping(f) => (RawFrameType::Ping, f.bits()).into(),
            FrameType::GoAway => (RawFrameType::GoAway, 0).into(),
            FrameType::WindowUpdate => (RawFrameType::WindowUpdate, 0).into(),
            FrameType::Continuation(f) => (RawFrameType::Continuation, f.bits()).into(),
            FrameType::Unknown(ft) => ft,
        }
    }

    fn decode(ft: EncodedFrameType) -> Self {
        match RawFrameType::from_repr(ft.ty) {
            Some(ty) => match ty {
                RawFrameType::Data => {
                    FrameType::Data(BitFlags::<DataFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::Headers => {
                    FrameType::Headers(BitFlags::<HeadersFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::Priority => FrameType::Priority,
                RawFrameType::RstStream => FrameType::RstStream,
                RawFrameType::Settings => {
                    FrameType::Settings(BitFlags::<SettingsFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::PushPromise => FrameType::PushPromise(
                    BitFlags::<PushPromiseFlags>::from_bits_truncate(ft.flags),
                ),
                RawFrameType::Ping => {
                    FrameType::Ping(BitFlags::<PingFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::GoAway => FrameType::GoAway,
                RawFrameType::WindowUpdate => FrameType::WindowUpdate,
                RawFrameType::Continuation => FrameType::Continuation(
                    BitFlags::<ContinuationFlags>::from_bits_truncate(ft.flags),
                ),
            },
            None => FrameType::Unknown(ft),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Stream ID used for connection control frames
    pub const CONNECTION: Self = Self(0);

    /// Odd stream IDs belong to client-initiated streams.
    pub fn is_client_initiated(self) -> bool {
        self.0 % 2 == 1
    }

    /// Even, non-zero stream IDs belong to server-initiated (pushed) streams.
    pub fn is_server_initiated(self) -> bool {
        self.0 != 0 && self.0 % 2 == 0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid stream id: {0}")]
pub struct StreamIdOutOfRange(pub u32);

impl TryFrom<u32> for StreamId {
    type Error = StreamIdOutOfRange;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value & 0x8000_0000 != 0 {
            Err(StreamIdOutOfRange(value))
        } else {
            Ok(Self(value))
        }
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

/// See https://httpwg.org/specs/rfc9113.html#FrameHeader
#[derive(Debug)]
pub struct Frame {
    pub frame_type: FrameType,
    pub reserved: u8,
    pub stream_id: StreamId,
    pub len: u32,
}

impl Frame {
    /// Create a new frame with the given type and stream ID.
    pub fn new(frame_type: FrameType, stream_id: StreamId) -> Self {
        Self {
            frame_type,
            reserved: 0,
            stream_id,
            len: 0,
        }
    }

    /// Set the frame's length.
    pub fn with_len(mut self, len: u32) -> Self {
        self.len = len;
        self
    }

    /// Parse a frame header from the given slice. The payload is left in
    /// the input; callers split it off themselves once enough bytes have
    /// accumulated.
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, (len, frame_type, (reserved, stream_id))) = tuple((
            be_u24,
            EncodedFrameType::parse,
            parse_reserved_and_stream_id,
        ))(i)?;

        let frame = Frame {
            frame_type: FrameType::decode(frame_type),
            reserved,
            stream_id,
            len,
        };
        Ok((i, frame))
    }

    /// Write the 9-byte frame header.
    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        use byteorder::{BigEndian, WriteBytesExt};
        w.write_u24::<BigEndian>(self.len)?;
        let ft = self.frame_type.encode();
        w.write_u8(ft.ty)?;
        w.write_u8(ft.flags)?;
        // the reserved bit is always written as zero
        w.write_u32::<BigEndian>(self.stream_id.0 & 0x7fff_ffff)?;

        Ok(())
    }

    pub fn is_end_stream(&self) -> bool {
        match self.frame_type {
            FrameType::Data(f) => f.contains(DataFlags::EndStream),
            FrameType::Headers(f) => f.contains(HeadersFlags::EndStream),
            _ => false,
        }
    }
}

/// See https://httpwg.org/specs/rfc9113.html#FrameHeader - the first bit
/// is reserved, and the rest is a 31-bit stream id
fn parse_reserved_and_stream_id(i: &[u8]) -> IResult<&[u8], (u8, StreamId)> {
    fn reserved(i: (&[u8], usize)) -> IResult<(&[u8], usize), u8> {
        nom::bits::streaming::take(1_usize)(i)
    }

    fn stream_id(i: (&[u8], usize)) -> IResult<(&[u8], usize), StreamId> {
        nom::combinator::map(nom::bits::streaming::take(31_usize), StreamId)(i)
    }

    nom::bits::bits(tuple((reserved, stream_id)))(i)
}

fn parse_reserved_and_u31(i: &[u8]) -> IResult<&[u8], (u8, u32)> {
    fn reserved(i: (&[u8], usize)) -> IResult<(&[u8], usize), u8> {
        nom::bits::streaming::take(1_usize)(i)
    }

    fn value(i: (&[u8], usize)) -> IResult<(&[u8], usize), u32> {
        nom::bits::streaming::take(31_usize)(i)
    }

    nom::bits::bits(tuple((reserved, value)))(i)
}

// cf. https://httpwg.org/specs/rfc9113.html#HEADERS
#[derive(Debug)]
pub struct PrioritySpec {
    pub exclusive: bool,
    pub stream_dependency: StreamId,
    // 0-255 => 1-256
    pub weight: u8,
}

impl PrioritySpec {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map(
            tuple((parse_reserved_and_stream_id, be_u8)),
            |((exclusive, stream_dependency), weight)| Self {
                exclusive: exclusive != 0,
                stream_dependency,
                weight,
            },
        )(i)
    }
}

/// See https://httpwg.org/specs/rfc9113.html#WINDOW_UPDATE
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdate {
    pub reserved: u8,
    pub increment: u32,
}

impl WindowUpdate {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        map(parse_reserved_and_u31, |(reserved, increment)| Self {
            reserved,
            increment,
        })(i)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub fn repr(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match KnownErrorCode::from_repr(self.0) {
            Some(e) => fmt::Debug::fmt(&e, f),
            None => write!(f, "ErrorCode(0x{:02x})", self.0),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<KnownErrorCode> for ErrorCode {
    fn from(e: KnownErrorCode) -> Self {
        Self(e as u32)
    }
}

/// Error codes from the RFC 9113 registry, cf.
/// https://httpwg.org/specs/rfc9113.html#ErrorCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum KnownErrorCode {
    /// Graceful shutdown, not actually an error.
    NoError = 0x00,

    /// Unspecific protocol violation.
    ProtocolError = 0x01,

    /// The endpoint encountered an unexpected internal error.
    InternalError = 0x02,

    /// The peer violated the flow-control protocol.
    FlowControlError = 0x03,

    /// SETTINGS was not acknowledged in a timely manner.
    SettingsTimeout = 0x04,

    /// A frame was received after a stream was half-closed.
    StreamClosed = 0x05,

    /// A frame had an invalid size.
    FrameSizeError = 0x06,

    /// The stream was refused before any application processing.
    RefusedStream = 0x07,

    /// The stream is no longer needed.
    Cancel = 0x08,

    /// The field section compression context cannot be maintained.
    CompressionError = 0x09,

    /// A CONNECT tunnel was reset or abnormally closed.
    ConnectError = 0x0a,

    /// The peer is generating excessive load.
    EnhanceYourCalm = 0x0b,

    /// Transport security properties were inadequate.
    InadequateSecurity = 0x0c,

    /// HTTP/1.1 is required.
    Http1_1Required = 0x0d,
}

impl KnownErrorCode {
    pub fn from_repr(code: u32) -> Option<Self> {
        match code {
            0x00 => Some(Self::NoError),
            0x01 => Some(Self::ProtocolError),
            0x02 => Some(Self::InternalError),
            0x03 => Some(Self::FlowControlError),
            0x04 => Some(Self::SettingsTimeout),
            0x05 => Some(Self::StreamClosed),
            0x06 => Some(Self::FrameSizeError),
            0x07 => Some(Self::RefusedStream),
            0x08 => Some(Self::Cancel),
            0x09 => Some(Self::CompressionError),
            0x0a => Some(Self::ConnectError),
            0x0b => Some(Self::EnhanceYourCalm),
            0x0c => Some(Self::InadequateSecurity),
            0x0d => Some(Self::Http1_1Required),
            _ => None,
        }
    }

    pub fn repr(self) -> u32 {
        self as u32
    }
}

impl TryFrom<ErrorCode> for KnownErrorCode {
    type Error = ();

    fn try_from(e: ErrorCode) -> Result<Self, Self::Error> {
        KnownErrorCode::from_repr(e.0).ok_or(())
    }
}

/// Settings identifiers, cf. https://httpwg.org/specs/rfc9113.html#SettingValues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Setting {
    HeaderTableSize = 0x01,
    EnablePush = 0x02,
    MaxConcurrentStreams = 0x03,
    InitialWindowSize = 0x04,
    MaxFrameSize = 0x05,
    MaxHeaderListSize = 0x06,
}

impl Setting {
    pub fn from_repr(id: u16) -> Option<Self> {
        match id {
            0x01 => Some(Self::HeaderTableSize),
            0x02 => Some(Self::EnablePush),
            0x03 => Some(Self::MaxConcurrentStreams),
            0x04 => Some(Self::InitialWindowSize),
            0x05 => Some(Self::MaxFrameSize),
            0x06 => Some(Self::MaxHeaderListSize),
            _ => None,
        }
    }

    pub fn repr(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("settings frame length {0} is not a multiple of 6")]
    InvalidLength(usize),

    #[error("initial window size {value} exceeds 2^31-1")]
    InitialWindowSizeTooLarge { value: u32 },

    #[error("ENABLE_PUSH must be 0 or 1, got {value}")]
    EnablePushInvalid { value: u32 },

    #[error("max frame size {value} not in [16384, 16777215]")]
    MaxFrameSizeInvalid { value: u32 },
}

/// Connection settings, cf. https://httpwg.org/specs/rfc9113.html#SettingValues
///
/// Defaults are the initial values mandated by RFC 9113 section 6.5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: 65_535,
            max_frame_size: 16_384,
            max_header_list_size: u32::MAX,
        }
    }
}

impl Settings {
    pub const MAX_INITIAL_WINDOW_SIZE: u32 = (1 << 31) - 1;
    pub const MIN_MAX_FRAME_SIZE: u32 = 16_384;
    pub const MAX_MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

    /// Apply a single validated setting.
    pub fn apply(&mut self, setting: Setting, value: u32) -> Result<(), SettingsError> {
        match setting {
            Setting::HeaderTableSize => self.header_table_size = value,
            Setting::EnablePush => match value {
                0 => self.enable_push = false,
                1 => self.enable_push = true,
                _ => return Err(SettingsError::EnablePushInvalid { value }),
            },
            Setting::MaxConcurrentStreams => self.max_concurrent_streams = Some(value),
            Setting::InitialWindowSize => {
                if value > Self::MAX_INITIAL_WINDOW_SIZE {
                    return Err(SettingsError::InitialWindowSizeTooLarge { value });
                }
                self.initial_window_size = value;
            }
            Setting::MaxFrameSize => {
                if !(Self::MIN_MAX_FRAME_SIZE..=Self::MAX_MAX_FRAME_SIZE).contains(&value) {
                    return Err(SettingsError::MaxFrameSizeInvalid { value });
                }
                self.max_frame_size = value;
            }
            Setting::MaxHeaderListSize => self.max_header_list_size = value,
        }
        Ok(())
    }

    /// Parse and apply a SETTINGS payload. Unknown identifiers are ignored,
    /// per RFC 9113 section 6.5.2.
    pub fn parse_payload(&mut self, payload: &[u8]) -> Result<(), SettingsError> {
        if payload.len() % 6 != 0 {
            return Err(SettingsError::InvalidLength(payload.len()));
        }
        for pair in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([pair[0], pair[1]]);
            let value = u32::from_be_bytes([pair[2], pair[3], pair[4], pair[5]]);
            match Setting::from_repr(id) {
                Some(setting) => self.apply(setting, value)?,
                None => debug!(%id, %value, "ignoring unknown setting"),
            }
        }
        Ok(())
    }
}

/// A borrowed list of (setting, value) pairs, encodable as a SETTINGS payload.
pub struct SettingPairs<'a>(pub &'a [(Setting, u32)]);

impl SettingPairs<'_> {
    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.len() * 6);
        for (setting, value) in self.0 {
            out.extend_from_slice(&setting.repr().to_be_bytes());
            out.extend_from_slice(&value.to_be_bytes());
        }
        out
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FrameEncodeError {
    #[error("frame payload length {len} exceeds the 24-bit length field")]
    PayloadTooLong { len: usize },
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FrameDecodeError {
    #[error("truncated frame: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },

    #[error("malformed frame header")]
    MalformedHeader,

    #[error("RST_STREAM payload must be 4 bytes, got {len}")]
    InvalidRstStreamSize { len: usize },

    #[error("GOAWAY payload must be at least 8 bytes, got {len}")]
    InvalidGoAwaySize { len: usize },

    /// The canonical per-stream failure signal: the peer reset this stream.
    #[error("stream {stream_id} reset by peer: {error_code:?}")]
    StreamReset {
        stream_id: StreamId,
        error_code: ErrorCode,
    },

    /// The canonical per-connection failure signal: the peer is going away.
    #[error("connection going away after stream {last_stream_id}: {error_code:?}")]
    GoAway {
        last_stream_id: StreamId,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
}

/// A frame whose payload has been split off the wire.
#[derive(Debug)]
pub struct DecodedFrame {
    pub frame: Frame,
    pub payload: Bytes,
}

impl DecodedFrame {
    /// Bytes this frame occupied on the wire.
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }
}

/// Decode one frame from the front of `input`.
///
/// The input must hold the full frame: a declared payload length larger
/// than the remaining bytes is a truncation error, not a request for more
/// input. RST_STREAM and GOAWAY never decode into a frame value: their
/// error codes are surfaced as [FrameDecodeError::StreamReset] and
/// [FrameDecodeError::GoAway] so callers cannot treat them as silent
/// successes.
pub fn deframe(input: &[u8]) -> Result<DecodedFrame, FrameDecodeError> {
    if input.len() < FRAME_HEADER_LEN {
        return Err(FrameDecodeError::Truncated {
            needed: FRAME_HEADER_LEN,
            available: input.len(),
        });
    }
    let (rest, frame) = Frame::parse(input).map_err(|_| FrameDecodeError::MalformedHeader)?;
    let declared = frame.len as usize;
    if rest.len() < declared {
        return Err(FrameDecodeError::Truncated {
            needed: FRAME_HEADER_LEN + declared,
            available: input.len(),
        });
    }
    let payload = Bytes::copy_from_slice(&rest[..declared]);

    match frame.frame_type {
        FrameType::RstStream => {
            if payload.len() != 4 {
                return Err(FrameDecodeError::InvalidRstStreamSize {
                    len: payload.len(),
                });
            }
            let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            Err(FrameDecodeError::StreamReset {
                stream_id: frame.stream_id,
                error_code: ErrorCode(code),
            })
        }
        FrameType::GoAway => {
            if payload.len() < 8 {
                return Err(FrameDecodeError::InvalidGoAwaySize {
                    len: payload.len(),
                });
            }
            let last = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
            Err(FrameDecodeError::GoAway {
                last_stream_id: StreamId(last & 0x7fff_ffff),
                error_code: ErrorCode(code),
                debug_data: payload.slice(8..),
            })
        }
        _ => Ok(DecodedFrame { frame, payload }),
    }
}

/// Assemble a raw frame: 9-byte header followed by the payload.
///
/// This is the lowest-level builder; it does not care whether the type
/// code or flags make sense together.
pub fn build_frame(
    ty: u8,
    flags: u8,
    stream_id: StreamId,
    payload: &[u8],
) -> Result<Vec<u8>, FrameEncodeError> {
    let len = payload.len();
    if len > MAX_FRAME_PAYLOAD_LEN {
        return Err(FrameEncodeError::PayloadTooLong { len });
    }
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + len);
    out.extend_from_slice(&[(len >> 16) as u8, (len >> 8) as u8, len as u8, ty, flags]);
    out.extend_from_slice(&(stream_id.0 & 0x7fff_ffff).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

fn build_known_frame(ty: RawFrameType, flags: u8, stream_id: StreamId, payload: &[u8]) -> Vec<u8> {
    // payloads of well-known frames are all far below the 24-bit limit
    match build_frame(ty.repr(), flags, stream_id, payload) {
        Ok(bytes) => bytes,
        Err(FrameEncodeError::PayloadTooLong { len }) => {
            unreachable!("well-known frame payload of {len} bytes")
        }
    }
}

/// An empty SETTINGS frame.
pub fn settings_frame() -> Vec<u8> {
    build_known_frame(RawFrameType::Settings, 0, StreamId::CONNECTION, &[])
}

/// A SETTINGS frame carrying the given pairs.
pub fn settings_frame_with(pairs: SettingPairs<'_>) -> Vec<u8> {
    build_known_frame(
        RawFrameType::Settings,
        0,
        StreamId::CONNECTION,
        &pairs.into_bytes(),
    )
}

/// A SETTINGS acknowledgement.
pub fn settings_ack() -> Vec<u8> {
    build_known_frame(
        RawFrameType::Settings,
        SettingsFlags::Ack as u8,
        StreamId::CONNECTION,
        &[],
    )
}

/// An RST_STREAM frame for the given stream.
pub fn rst_stream(stream_id: StreamId, code: ErrorCode) -> Vec<u8> {
    build_known_frame(
        RawFrameType::RstStream,
        0,
        stream_id,
        &code.repr().to_be_bytes(),
    )
}

/// A WINDOW_UPDATE frame for the given stream (or the connection, with
/// [StreamId::CONNECTION]).
pub fn window_update(stream_id: StreamId, increment: u32) -> Vec<u8> {
    build_known_frame(
        RawFrameType::WindowUpdate,
        0,
        stream_id,
        &(increment & 0x7fff_ffff).to_be_bytes(),
    )
}

/// A PING frame with an 8-byte opaque payload.
pub fn ping(opaque: [u8; 8]) -> Vec<u8> {
    build_known_frame(RawFrameType::Ping, 0, StreamId::CONNECTION, &opaque)
}

/// A PING acknowledgement echoing the given opaque payload.
pub fn ping_ack(opaque: [u8; 8]) -> Vec<u8> {
    build_known_frame(
        RawFrameType::Ping,
        PingFlags::Ack as u8,
        StreamId::CONNECTION,
        &opaque,
    )
}

/// A GOAWAY frame with the last processed stream id and an error code.
pub fn goaway(last_stream_id: StreamId, code: ErrorCode) -> Vec<u8> {
    let mut payload = [0u8; 8];
    payload[..4].copy_from_slice(&(last_stream_id.0 & 0x7fff_ffff).to_be_bytes());
    payload[4..].copy_from_slice(&code.repr().to_be_bytes());
    build_known_frame(RawFrameType::GoAway, 0, StreamId::CONNECTION, &payload)
}

/// Map a compressed 7-bit status index from the legacy pseudo-header
/// scheme to a conventional HTTP status integer. The indices are the
/// `:status` rows of the HPACK static table; anything else passes
/// through unchanged.
pub fn status_from_index(index: u8) -> u16 {
    match index {
        8 => 200,
        9 => 204,
        10 => 206,
        11 => 304,
        12 => 400,
        13 => 404,
        14 => 500,
        other => other as u16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn build_frame_matches_wire_layout() {
        // HEADERS, EndStream flag, stream 0, empty payload
        let bytes = build_frame(0x1, 0x1, StreamId(0), &[]).unwrap();
        assert_eq!(
            bytes,
            vec![0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn decode_zero_length_frame() {
        // length 0, type 0x04 (SETTINGS), flags 0, stream 0
        let bytes = [0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00];
        let decoded = deframe(&bytes).unwrap();
        assert!(matches!(decoded.frame.frame_type, FrameType::Settings(f) if f.is_empty()));
        assert_eq!(decoded.frame.stream_id, StreamId(0));
        assert_eq!(decoded.frame.len, 0);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn frame_round_trip() {
        let payload = b"hello h2";
        let bytes = build_frame(0x0, 0x1, StreamId(3), payload).unwrap();
        let decoded = deframe(&bytes).unwrap();
        match decoded.frame.frame_type {
            FrameType::Data(flags) => assert!(flags.contains(DataFlags::EndStream)),
            other => panic!("expected DATA, got {other:?}"),
        }
        assert_eq!(decoded.frame.stream_id, StreamId(3));
        assert_eq!(&decoded.payload[..], payload);
        assert_eq!(decoded.wire_len(), bytes.len());
    }

    #[test]
    fn unknown_frame_type_is_preserved() {
        let bytes = build_frame(0x42, 0xab, StreamId(7), b"ext").unwrap();
        let decoded = deframe(&bytes).unwrap();
        match decoded.frame.frame_type {
            FrameType::Unknown(eft) => {
                assert_eq!(eft.ty, 0x42);
                assert_eq!(eft.flags, 0xab);
            }
            other => panic!("expected unknown frame, got {other:?}"),
        }
        assert_eq!(&decoded.payload[..], b"ext");
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut bytes = build_frame(0x0, 0, StreamId(1), b"abcdef").unwrap();
        bytes.truncate(bytes.len() - 3);
        match deframe(&bytes) {
            Err(FrameDecodeError::Truncated { needed, available }) => {
                assert_eq!(needed, FRAME_HEADER_LEN + 6);
                assert_eq!(available, FRAME_HEADER_LEN + 3);
            }
            other => panic!("expected truncation error, got {other:?}"),
        }
    }

    #[test]
    fn short_header_is_an_error() {
        match deframe(&[0x00, 0x00]) {
            Err(FrameDecodeError::Truncated { needed, .. }) => {
                assert_eq!(needed, FRAME_HEADER_LEN)
            }
            other => panic!("expected truncation error, got {other:?}"),
        }
    }

    #[test]
    fn payload_too_long_is_an_encoding_error() {
        let payload = vec![0u8; MAX_FRAME_PAYLOAD_LEN + 1];
        assert!(matches!(
            build_frame(0x0, 0, StreamId(1), &payload),
            Err(FrameEncodeError::PayloadTooLong { .. })
        ));
    }

    #[test]
    fn rst_stream_surfaces_error_code() {
        let bytes = rst_stream(StreamId(5), KnownErrorCode::Cancel.into());
        match deframe(&bytes) {
            Err(FrameDecodeError::StreamReset {
                stream_id,
                error_code,
            }) => {
                assert_eq!(stream_id, StreamId(5));
                assert_eq!(KnownErrorCode::try_from(error_code), Ok(KnownErrorCode::Cancel));
            }
            other => panic!("expected stream reset, got {other:?}"),
        }
    }

    #[test]
    fn goaway_surfaces_error_code() {
        let bytes = goaway(StreamId(7), KnownErrorCode::EnhanceYourCalm.into());
        match deframe(&bytes) {
            Err(FrameDecodeError::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            }) => {
                assert_eq!(last_stream_id, StreamId(7));
                assert_eq!(
                    KnownErrorCode::try_from(error_code),
                    Ok(KnownErrorCode::EnhanceYourCalm)
                );
                assert!(debug_data.is_empty());
            }
            other => panic!("expected goaway, got {other:?}"),
        }
    }

    #[test]
    fn preface_parses() {
        let mut input = PREFACE.to_vec();
        input.extend_from_slice(&settings_frame());
        let (rest, ()) = preface(&input).unwrap();
        assert_eq!(rest.len(), FRAME_HEADER_LEN);
    }

    #[test]
    fn settings_payload_round_trip() {
        let pairs = SettingPairs(&[
            (Setting::InitialWindowSize, 1 << 20),
            (Setting::MaxFrameSize, 32_768),
            (Setting::MaxConcurrentStreams, 100),
        ]);
        let payload = pairs.into_bytes();

        let mut settings = Settings::default();
        settings.parse_payload(&payload).unwrap();
        assert_eq!(settings.initial_window_size, 1 << 20);
        assert_eq!(settings.max_frame_size, 32_768);
        assert_eq!(settings.max_concurrent_streams, Some(100));
    }

    #[test]
    fn settings_validation() {
        let mut settings = Settings::default();
        assert!(matches!(
            settings.apply(Setting::InitialWindowSize, 1 << 31),
            Err(SettingsError::InitialWindowSizeTooLarge { .. })
        ));
        assert!(matches!(
            settings.apply(Setting::MaxFrameSize, 1024),
            Err(SettingsError::MaxFrameSizeInvalid { .. })
        ));
        assert!(matches!(
            settings.apply(Setting::EnablePush, 2),
            Err(SettingsError::EnablePushInvalid { .. })
        ));
        // odd length payloads are rejected before any pair is applied
        assert!(matches!(
            settings.parse_payload(&[0, 4, 0]),
            Err(SettingsError::InvalidLength(3))
        ));
    }

    #[test]
    fn settings_unknown_identifier_is_ignored() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x99u16.to_be_bytes());
        payload.extend_from_slice(&12345u32.to_be_bytes());
        let mut settings = Settings::default();
        settings.parse_payload(&payload).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn window_update_parse() {
        let bytes = window_update(StreamId(9), 100);
        let decoded = deframe(&bytes).unwrap();
        assert!(matches!(decoded.frame.frame_type, FrameType::WindowUpdate));
        let (_, wu) = WindowUpdate::parse(&decoded.payload).unwrap();
        assert_eq!(wu.increment, 100);
        assert_eq!(wu.reserved, 0);
    }

    #[test]
    fn legacy_status_indices() {
        assert_eq!(status_from_index(8), 200);
        assert_eq!(status_from_index(11), 304);
        assert_eq!(status_from_index(14), 500);
        // unmapped values pass through
        assert_eq!(status_from_index(42), 42);
    }
}
