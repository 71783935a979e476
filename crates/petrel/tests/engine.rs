//! End-to-end tests for the client engine, driven over an in-memory
//! transport by a hand-rolled test server that speaks just enough h2.

mod helpers;

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;

use petrel::error::ResponseError;
use petrel::h2::types::{H2ConnectionError, H2StreamError};
use petrel::h2::{ClientConf, H2Connection};
use petrel::http::StatusCode;
use petrel::petrel_h2 as h2;
use petrel::petrel_hpack;
use petrel::transport::{channel_pair, ChannelRx, ChannelTx, TransportError, TransportRx, TransportTx};
use petrel::Delivery;

use h2::{
    DataFlags, FrameType, HeadersFlags, KnownErrorCode, SettingsFlags, StreamId,
};
use helpers::tracing_common::setup_tracing;

/// What the test server pulls off the wire: a decoded frame, or one of
/// the failure signals the deframer refuses to present as frames.
enum Signal {
    Frame(h2::Frame, Bytes),
    Reset {
        stream_id: StreamId,
        error_code: h2::ErrorCode,
    },
}

/// A minimal in-process h2 server endpoint.
struct TestPeer {
    tx: ChannelTx,
    rx: ChannelRx,
    buf: BytesMut,
    dec: petrel_hpack::Decoder<'static>,
    enc: petrel_hpack::Encoder<'static>,
}

impl TestPeer {
    fn new(tx: ChannelTx, rx: ChannelRx) -> Self {
        Self {
            tx,
            rx,
            buf: BytesMut::new(),
            dec: petrel_hpack::Decoder::new(),
            enc: petrel_hpack::Encoder::new(),
        }
    }

    async fn recv_more(&mut self) {
        let chunk = self
            .rx
            .receive()
            .await
            .unwrap()
            .expect("client hung up mid-read");
        self.buf.extend_from_slice(&chunk);
    }

    async fn expect_preface(&mut self) {
        while self.buf.len() < h2::PREFACE.len() {
            self.recv_more().await;
        }
        let preface = self.buf.split_to(h2::PREFACE.len());
        assert_eq!(&preface[..], h2::PREFACE);
    }

    async fn next_signal(&mut self) -> Signal {
        loop {
            if self.buf.len() >= h2::FRAME_HEADER_LEN {
                let declared =
                    u32::from_be_bytes([0, self.buf[0], self.buf[1], self.buf[2]]) as usize;
                let total = h2::FRAME_HEADER_LEN + declared;
                if self.buf.len() >= total {
                    let frame_bytes = self.buf.split_to(total);
                    return match h2::deframe(&frame_bytes) {
                        Ok(decoded) => Signal::Frame(decoded.frame, decoded.payload),
                        Err(h2::FrameDecodeError::StreamReset {
                            stream_id,
                            error_code,
                        }) => Signal::Reset {
                            stream_id,
                            error_code,
                        },
                        Err(other) => panic!("test server could not decode frame: {other:?}"),
                    };
                }
            }
            self.recv_more().await;
        }
    }

    async fn next_frame(&mut self) -> (h2::Frame, Bytes) {
        match self.next_signal().await {
            Signal::Frame(frame, payload) => (frame, payload),
            Signal::Reset { stream_id, .. } => {
                panic!("expected a frame, got a reset for stream {stream_id}")
            }
        }
    }

    /// Run the settings exchange from the server side: read the
    /// client's SETTINGS, send ours, ack theirs.
    async fn greet(&mut self) {
        self.expect_preface().await;
        let (frame, _payload) = self.next_frame().await;
        assert!(
            matches!(frame.frame_type, FrameType::Settings(f) if !f.contains(SettingsFlags::Ack)),
            "expected the client's initial SETTINGS, got {frame:?}"
        );
        self.send(h2::settings_frame()).await;
        self.send(h2::settings_ack()).await;
    }

    /// Read frames until the client's next HEADERS, skipping its
    /// SETTINGS ack.
    async fn next_headers(&mut self) -> (h2::Frame, Vec<(Vec<u8>, Vec<u8>)>) {
        loop {
            let (frame, payload) = self.next_frame().await;
            match frame.frame_type {
                FrameType::Settings(f) if f.contains(SettingsFlags::Ack) => continue,
                FrameType::Headers(_) => {
                    let entries = self.dec.decode(&payload).unwrap();
                    return (frame, entries);
                }
                other => panic!("unexpected frame while waiting for headers: {other:?}"),
            }
        }
    }

    async fn expect_reset(&mut self, expected_stream: StreamId, expected_code: KnownErrorCode) {
        loop {
            match self.next_signal().await {
                Signal::Reset {
                    stream_id,
                    error_code,
                } => {
                    assert_eq!(stream_id, expected_stream);
                    assert_eq!(KnownErrorCode::try_from(error_code), Ok(expected_code));
                    return;
                }
                Signal::Frame(frame, _) => match frame.frame_type {
                    // acks may still be in flight
                    FrameType::Settings(f) if f.contains(SettingsFlags::Ack) => continue,
                    other => panic!("expected a reset, got {other:?}"),
                },
            }
        }
    }

    async fn send_response_headers(&mut self, stream_id: StreamId, end_stream: bool) {
        let block = self.enc.encode([
            (&b":status"[..], &b"200"[..]),
            (&b"server"[..], &b"petrel-test"[..]),
        ]);
        let mut flags = HeadersFlags::EndHeaders as u8;
        if end_stream {
            flags |= HeadersFlags::EndStream as u8;
        }
        let bytes = h2::build_frame(0x1, flags, stream_id, &block).unwrap();
        self.send(bytes).await;
    }

    async fn send(&mut self, bytes: Vec<u8>) {
        self.tx.send(Bytes::from(bytes)).await.unwrap();
    }
}

fn request_headers(path: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    vec![
        (b":method".to_vec(), b"GET".to_vec()),
        (b":scheme".to_vec(), b"https".to_vec()),
        (b":path".to_vec(), path.to_vec()),
        (b":authority".to_vec(), b"example.org".to_vec()),
    ]
}

#[tokio::test]
async fn request_response_round_trip() {
    setup_tracing();
    let ((client_tx, client_rx), (server_tx, server_rx)) = channel_pair(64);
    let (conn, _deliveries) =
        H2Connection::establish(client_rx, client_tx, ClientConf::default())
            .await
            .unwrap();

    let server = tokio::spawn(async move {
        let mut peer = TestPeer::new(server_tx, server_rx);
        peer.greet().await;

        let (frame, entries) = peer.next_headers().await;
        assert_eq!(frame.stream_id, StreamId(1));
        match frame.frame_type {
            FrameType::Headers(flags) => {
                assert!(flags.contains(HeadersFlags::EndHeaders));
                // no body: the request half-closes immediately
                assert!(flags.contains(HeadersFlags::EndStream));
            }
            other => panic!("expected headers, got {other:?}"),
        }
        assert_eq!(entries[0], (b":method".to_vec(), b"GET".to_vec()));
        assert_eq!(entries[2], (b":path".to_vec(), b"/".to_vec()));

        peer.send_response_headers(StreamId(1), true).await;

        // a completed stream is reset to release peer-side state
        peer.expect_reset(StreamId(1), KnownErrorCode::Cancel).await;
    });

    let handle = conn.request(request_headers(b"/"), None).await.unwrap();
    assert_eq!(handle.stream_id, StreamId(1));

    let response = handle.response().await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert!(response
        .headers
        .contains(&(b"server".to_vec(), b"petrel-test".to_vec())));
    assert!(response.body.is_empty());

    server.await.unwrap();
}

#[tokio::test]
async fn response_body_is_aggregated_across_data_frames() {
    setup_tracing();
    let ((client_tx, client_rx), (server_tx, server_rx)) = channel_pair(64);
    let (conn, _deliveries) =
        H2Connection::establish(client_rx, client_tx, ClientConf::default())
            .await
            .unwrap();

    let server = tokio::spawn(async move {
        let mut peer = TestPeer::new(server_tx, server_rx);
        peer.greet().await;
        let (frame, _entries) = peer.next_headers().await;
        assert_eq!(frame.stream_id, StreamId(1));

        peer.send_response_headers(StreamId(1), false).await;
        let data1 = h2::build_frame(0x0, 0, StreamId(1), b"hello, ").unwrap();
        peer.send(data1).await;
        let data2 =
            h2::build_frame(0x0, DataFlags::EndStream as u8, StreamId(1), b"world").unwrap();
        peer.send(data2).await;

        peer.expect_reset(StreamId(1), KnownErrorCode::Cancel).await;
    });

    let handle = conn.request(request_headers(b"/body"), None).await.unwrap();
    let response = handle.response().await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], b"hello, world");

    server.await.unwrap();
}

#[tokio::test]
async fn push_promise_is_delivered_and_the_pushed_stream_completes() {
    setup_tracing();
    let ((client_tx, client_rx), (server_tx, server_rx)) = channel_pair(64);
    let (conn, mut deliveries) =
        H2Connection::establish(client_rx, client_tx, ClientConf::default())
            .await
            .unwrap();

    let server = tokio::spawn(async move {
        let mut peer = TestPeer::new(server_tx, server_rx);
        peer.greet().await;
        let (frame, _entries) = peer.next_headers().await;
        assert_eq!(frame.stream_id, StreamId(1));

        // promise stream 2 on stream 1, then answer both
        let mut promise = 2u32.to_be_bytes().to_vec();
        promise.extend(peer.enc.encode([
            (&b":method"[..], &b"GET"[..]),
            (&b":path"[..], &b"/style.css"[..]),
        ]));
        let bytes = h2::build_frame(0x5, 0x04, StreamId(1), &promise).unwrap();
        peer.send(bytes).await;

        peer.send_response_headers(StreamId(1), true).await;
        peer.expect_reset(StreamId(1), KnownErrorCode::Cancel).await;

        peer.send_response_headers(StreamId(2), true).await;
        peer.expect_reset(StreamId(2), KnownErrorCode::Cancel).await;
    });

    let handle = conn.request(request_headers(b"/"), None).await.unwrap();
    let response = handle.response().await.unwrap();
    assert_eq!(response.stream_id, StreamId(1));

    // the push notification arrives on the delivery channel, before
    // the pushed stream's own response
    match deliveries.recv().await.unwrap() {
        Delivery::Push(push) => {
            assert_eq!(push.stream_id, StreamId(2));
            assert!(push
                .headers
                .contains(&(b":path".to_vec(), b"/style.css".to_vec())));
        }
        other => panic!("expected a push notification, got {other:?}"),
    }
    match deliveries.recv().await.unwrap() {
        Delivery::Response(pushed) => {
            assert_eq!(pushed.stream_id, StreamId(2));
            assert_eq!(pushed.status, StatusCode::OK);
        }
        other => panic!("expected the pushed response, got {other:?}"),
    }

    server.await.unwrap();
}

#[tokio::test]
async fn goaway_fails_pending_streams_and_the_connection() {
    setup_tracing();
    let ((client_tx, client_rx), (server_tx, server_rx)) = channel_pair(64);
    let (conn, _deliveries) =
        H2Connection::establish(client_rx, client_tx, ClientConf::default())
            .await
            .unwrap();

    let server = tokio::spawn(async move {
        let mut peer = TestPeer::new(server_tx, server_rx);
        peer.greet().await;
        let (frame, _entries) = peer.next_headers().await;
        assert_eq!(frame.stream_id, StreamId(1));

        let bytes = h2::goaway(StreamId(1), KnownErrorCode::EnhanceYourCalm.into());
        peer.send(bytes).await;
    });

    let handle = conn.request(request_headers(b"/"), None).await.unwrap();

    match handle.response().await {
        Err(ResponseError::Stream(H2StreamError::Reset { code })) => {
            assert_eq!(
                KnownErrorCode::try_from(code),
                Ok(KnownErrorCode::EnhanceYourCalm)
            );
        }
        other => panic!("expected a stream failure, got {other:?}"),
    }

    match conn.join().await {
        Err(H2ConnectionError::GoAway {
            last_stream_id,
            error_code,
        }) => {
            assert_eq!(last_stream_id, StreamId(1));
            assert_eq!(
                KnownErrorCode::try_from(error_code),
                Ok(KnownErrorCode::EnhanceYourCalm)
            );
        }
        other => panic!("expected a goaway failure, got {other:?}"),
    }

    server.await.unwrap();
}

#[tokio::test]
async fn silent_transport_times_out() {
    setup_tracing();
    let ((client_tx, client_rx), _server_halves) = channel_pair(8);
    let conf = ClientConf {
        receive_timeout: Duration::from_millis(50),
        ..ClientConf::default()
    };
    let (conn, _deliveries) = H2Connection::establish(client_rx, client_tx, conf)
        .await
        .unwrap();

    // the server half stays alive but says nothing; the read loop's
    // bounded wait must fail rather than block forever
    match conn.join().await {
        Err(H2ConnectionError::Transport(TransportError::Timeout)) => {}
        other => panic!("expected a timeout, got {other:?}"),
    }
}
