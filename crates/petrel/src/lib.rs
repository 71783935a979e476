//! petrel is the client-side engine of an HTTP/2 implementation: it
//! turns an ordered byte stream from a transport into typed frames,
//! keeps one header-compression context per connection and direction,
//! and drives one independent state machine per logical stream.
//!
//! Transport establishment (TLS, sockets, ALPN) is someone else's
//! problem: the engine only asks for "send these bytes" and "receive
//! bytes, in order" — see [transport].

mod types;
pub use types::*;

pub mod error;
pub mod h2;
pub mod transport;

/// re-exported so consumers use the same frame and hpack types we do
pub use petrel_h2;
pub use petrel_hpack;

/// re-exported so consumers can use whatever version we use
pub use http;
