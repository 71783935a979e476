use bytes::Bytes;
use tokio::sync::oneshot;

use petrel_h2::{
    ErrorCode, FrameDecodeError, FrameType, KnownErrorCode, SettingsError, StreamId,
};
use petrel_hpack::DecoderError;

use crate::error::RequestError;
use crate::transport::TransportError;
use crate::{HeaderList, Response};

/// An error that poisons the whole connection: transport failures,
/// codec failures, and compression failures (the shared table state is
/// unreliable once a block fails to decode).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum H2ConnectionError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("frame too large: {frame_type:?} frame of size {frame_size} exceeds max frame size of {max_frame_size}")]
    FrameTooLarge {
        frame_type: FrameType,
        frame_size: u32,
        max_frame_size: u32,
    },

    #[error("peer hung up mid-frame with {buffered} bytes buffered")]
    IncompleteFrame { buffered: usize },

    #[error("error decoding frame: {0}")]
    BadFrame(FrameDecodeError),

    #[error("malformed {frame_type:?} payload")]
    MalformedPayload { frame_type: FrameType },

    #[error("received {frame_type:?} frame with Padded flag but empty payload")]
    PaddedFrameEmpty { frame_type: FrameType },

    #[error("received {frame_type:?} with Padded flag but payload was shorter than padding")]
    PaddedFrameTooShort {
        frame_type: FrameType,
        padding_length: usize,
        frame_size: usize,
    },

    #[error("hpack decoding error: {0}")]
    HpackDecodingError(#[from] DecoderError),

    #[error("stream-specific frame {frame_type:?} sent to stream ID 0 (connection-wide)")]
    StreamSpecificFrameToConnection { frame_type: FrameType },

    #[error("received settings frame with non-zero stream id {stream_id}")]
    SettingsWithNonZeroStreamId { stream_id: StreamId },

    #[error("received settings frame with invalid length {len}")]
    SettingsInvalidLength { len: usize },

    #[error("bad setting value: {0}")]
    BadSettingValue(#[from] SettingsError),

    #[error("received ping frame with non-zero stream id {stream_id}")]
    PingFrameWithNonZeroStreamId { stream_id: StreamId },

    #[error("received ping frame with invalid length {len}")]
    PingFrameInvalidLength { len: usize },

    #[error("received window update frame with invalid length {len}")]
    WindowUpdateInvalidLength { len: usize },

    /// The canonical per-connection failure signal, straight from the
    /// peer's GOAWAY frame. Graceful shutdowns carry
    /// [KnownErrorCode::NoError].
    #[error("connection going away after stream {last_stream_id}: {error_code:?}")]
    GoAway {
        last_stream_id: StreamId,
        error_code: ErrorCode,
    },

    #[error("error writing frame: {0}")]
    WriteError(std::io::Error),

    #[error("connection task failed")]
    TaskFailed,
}

impl H2ConnectionError {
    pub fn as_known_error_code(&self) -> KnownErrorCode {
        use H2ConnectionError::*;
        use KnownErrorCode as Code;

        match self {
            // frame size errors
            FrameTooLarge { .. } => Code::FrameSizeError,
            PaddedFrameEmpty { .. } => Code::FrameSizeError,
            PingFrameInvalidLength { .. } => Code::FrameSizeError,
            SettingsInvalidLength { .. } => Code::FrameSizeError,
            WindowUpdateInvalidLength { .. } => Code::FrameSizeError,
            BadFrame(FrameDecodeError::InvalidRstStreamSize { .. }) => Code::FrameSizeError,
            BadFrame(FrameDecodeError::InvalidGoAwaySize { .. }) => Code::FrameSizeError,
            // flow control errors
            BadSettingValue(SettingsError::InitialWindowSizeTooLarge { .. }) => {
                Code::FlowControlError
            }
            // compression errors
            HpackDecodingError(_) => Code::CompressionError,
            // everything else is a garden-variety protocol error
            _ => Code::ProtocolError,
        }
    }
}

/// An error scoped to a single stream; the rest of the connection
/// stays usable.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum H2StreamError {
    /// The canonical per-stream failure signal, straight from the
    /// peer's RST_STREAM frame (or a GOAWAY covering this stream).
    #[error("stream reset by peer: {code:?}")]
    Reset { code: ErrorCode },

    #[error("window update made the send window overflow")]
    WindowUpdateOverflow,
}

impl H2StreamError {
    pub fn as_known_error_code(&self) -> KnownErrorCode {
        match self {
            H2StreamError::Reset { code } => {
                KnownErrorCode::from_repr(code.repr()).unwrap_or(KnownErrorCode::ProtocolError)
            }
            H2StreamError::WindowUpdateOverflow => KnownErrorCode::FlowControlError,
        }
    }

    pub(crate) fn as_error_code(&self) -> ErrorCode {
        match self {
            H2StreamError::Reset { code } => *code,
            other => other.as_known_error_code().into(),
        }
    }
}

/// One event for one stream's state machine, routed by the connection
/// dispatcher. A stream processes these strictly one at a time, in
/// transport arrival order.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    /// Issue the request this stream was created for. The ack fires
    /// once the stream has accepted the request, not when the response
    /// completes.
    SendRequest {
        headers: HeaderList,
        body: Option<Bytes>,
        ack: oneshot::Sender<Result<StreamId, RequestError>>,
    },

    /// A decoded HEADERS or CONTINUATION fragment.
    Headers {
        entries: HeaderList,
        end_stream: bool,
    },

    /// A DATA frame's payload, padding already stripped.
    Data { chunk: Bytes, end_stream: bool },

    /// The peer promised this stream; entries are the promised
    /// request's decoded headers.
    PushPromise { entries: HeaderList },

    /// The peer reset this stream (RST_STREAM, or GOAWAY covering it).
    Reset { code: ErrorCode },

    /// WINDOW_UPDATE for this stream.
    WindowUpdate { increment: u32 },

    /// The peer's SETTINGS changed mid-flight; apply without
    /// interrupting in-flight state.
    SettingsChanged {
        window_delta: i64,
        max_frame_size: u32,
    },

    /// Local cancellation: terminate immediately, no flush, no
    /// delivery.
    Close,
}

/// One command for the connection dispatcher, from a stream or from
/// the client handle. The dispatcher executes these in channel order,
/// which is what keeps hpack encode order equal to wire order.
#[derive(Debug)]
pub(crate) enum ConnEvent {
    StartRequest(StartRequest),

    SendHeaders {
        stream_id: StreamId,
        headers: HeaderList,
        end_stream: bool,
    },

    SendData {
        stream_id: StreamId,
        chunk: Bytes,
        end_stream: bool,
    },

    SendRst {
        stream_id: StreamId,
        code: ErrorCode,
    },

    /// A stream reached its terminal state; the dispatcher drops its
    /// handle.
    StreamDone { stream_id: StreamId },

    /// Local cancellation of a stream.
    CloseStream { stream_id: StreamId },
}

#[derive(Debug)]
pub(crate) struct StartRequest {
    pub headers: HeaderList,
    pub body: Option<Bytes>,
    pub ack: oneshot::Sender<Result<StreamId, RequestError>>,
    pub response: oneshot::Sender<Result<Response, H2StreamError>>,
}
