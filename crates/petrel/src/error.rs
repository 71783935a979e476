use crate::h2::types::H2StreamError;

/// Errors surfaced to a caller issuing a request on a connection
/// handle.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The connection task is gone; no new streams can be opened.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Opening the stream would exceed the peer's advertised
    /// SETTINGS_MAX_CONCURRENT_STREAMS.
    #[error("stream refused: peer's concurrent stream limit reached")]
    RefusedStream,
}

/// Errors surfaced to a caller awaiting a single response.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    /// The stream failed at the protocol level.
    #[error("stream error: {0}")]
    Stream(#[from] H2StreamError),

    /// The connection went down before the stream completed.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
}
