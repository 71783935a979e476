use std::fmt;

use bytes::Bytes;
use http::StatusCode;
use tracing::debug;

use petrel_h2::{status_from_index, ErrorCode, StreamId};

/// A header list in wire order: insertion-ordered, duplicates
/// preserved. HTTP/2 header blocks are ordered sequences, not maps.
pub type HeaderList = Vec<(Vec<u8>, Vec<u8>)>;

/// The record delivered to the client once a stream completes.
#[derive(Clone)]
pub struct Response {
    pub stream_id: StreamId,

    /// Status code (1xx-5xx)
    pub status: StatusCode,

    /// Response headers, in arrival order
    pub headers: HeaderList,

    /// Aggregated body bytes
    pub body: Bytes,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("stream_id", &self.stream_id)
            .field("status", &self.status)
            .field("headers", &self.headers.len())
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// The record delivered to the client when the peer announces a pushed
/// stream, before any body accumulation begins.
#[derive(Debug, Clone)]
pub struct PushPromise {
    pub stream_id: StreamId,

    /// The promised request's headers, in arrival order
    pub headers: HeaderList,
}

/// What the engine hands to the registered recipient.
#[derive(Debug)]
pub enum Delivery {
    /// A stream completed normally.
    Response(Response),

    /// The peer announced a pushed stream.
    Push(PushPromise),

    /// A stream failed with a protocol-level error code.
    StreamError {
        stream_id: StreamId,
        code: ErrorCode,
    },
}

/// Extract the status code from a header list's `:status`
/// pseudo-header. ASCII digits are the normal case; a single
/// non-digit octet is a compressed status index from the legacy
/// pseudo-header scheme.
pub(crate) fn status_of(headers: &HeaderList) -> StatusCode {
    let value = headers
        .iter()
        .find(|(name, _)| name == b":status")
        .map(|(_, value)| value.as_slice());

    let raw = match value {
        Some(value) => value,
        None => {
            debug!("response has no :status pseudo-header, assuming 200");
            return StatusCode::OK;
        }
    };

    let numeric = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .or_else(|| match raw {
            [index] => Some(status_from_index(*index)),
            _ => None,
        });

    match numeric.and_then(|n| StatusCode::from_u16(n).ok()) {
        Some(status) => status,
        None => {
            debug!(value = ?raw, "unparseable :status value, assuming 200");
            StatusCode::OK
        }
    }
}
