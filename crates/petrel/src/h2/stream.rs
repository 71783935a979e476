//! One state machine per logical stream.
//!
//! Each stream runs as its own task, processing one event at a time in
//! transport arrival order; correctness relies on that serialization,
//! not on locks. Streams share nothing but the command channel to the
//! connection dispatcher (which owns the transport and both hpack
//! directions) and the delivery channel to the client.

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use petrel_h2::{KnownErrorCode, StreamId};

use crate::error::RequestError;
use crate::h2::flow::StreamFlow;
use crate::h2::types::{ConnEvent, H2StreamError, StreamEvent};
use crate::types::status_of;
use crate::{Delivery, HeaderList, PushPromise, Response};

// cf. RFC 9113, 5.1 Stream States, reduced to what a client that
// aggregates full responses needs:
//
//     idle ──send H──▶ open ──body sent──▶ half_closed (local)
//       │               │                        │
//       │recv PP        │recv ES / recv R        │recv ES / recv R
//       ▼               ▼                        ▼
//     reserved      half_closed (remote) ──────▶ closed
//     (remote)          (on entry: send R, deliver, close)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
    Idle,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

pub(crate) struct Stream {
    id: StreamId,
    state: StreamState,

    /// Received headers, in arrival order, duplicates preserved.
    headers: HeaderList,

    /// Aggregated body bytes.
    body: BytesMut,

    flow: StreamFlow,

    conn_tx: mpsc::Sender<ConnEvent>,
    delivery_tx: mpsc::Sender<Delivery>,

    /// Per-request callback; when absent, completion goes to the
    /// connection-wide delivery channel instead.
    response_tx: Option<oneshot::Sender<Result<Response, H2StreamError>>>,

    delivered: bool,
}

impl Stream {
    pub(crate) fn new(
        id: StreamId,
        initial_window_size: u32,
        max_frame_size: u32,
        conn_tx: mpsc::Sender<ConnEvent>,
        delivery_tx: mpsc::Sender<Delivery>,
        response_tx: Option<oneshot::Sender<Result<Response, H2StreamError>>>,
    ) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            headers: HeaderList::new(),
            body: BytesMut::new(),
            flow: StreamFlow::new(initial_window_size, max_frame_size),
            conn_tx,
            delivery_tx,
            response_tx,
            delivered: false,
        }
    }

    /// Drive this stream until it reaches its terminal state or its
    /// event source goes away.
    pub(crate) async fn run(mut self, mut ev_rx: mpsc::Receiver<StreamEvent>) {
        while let Some(ev) = ev_rx.recv().await {
            if self.on_event(ev).await {
                break;
            }
        }
        trace!(stream_id = %self.id, "stream task finished");
    }

    /// Process one event. Returns true once the stream is done and its
    /// task should exit.
    async fn on_event(&mut self, ev: StreamEvent) -> bool {
        trace!(stream_id = %self.id, state = ?self.state, ?ev, "stream event");
        match ev {
            StreamEvent::SendRequest { headers, body, ack } => {
                self.send_request(headers, body, ack).await
            }

            StreamEvent::Headers {
                entries,
                end_stream,
            } => {
                if self.state == StreamState::Closed {
                    debug!(stream_id = %self.id, "headers for closed stream ignored");
                    return false;
                }
                self.headers.extend(entries);
                if end_stream {
                    self.enter_half_closed_remote().await
                } else {
                    false
                }
            }

            StreamEvent::Data { chunk, end_stream } => {
                if self.state == StreamState::Closed {
                    debug!(stream_id = %self.id, "data for closed stream ignored");
                    return false;
                }
                self.body.extend_from_slice(&chunk);
                if !end_stream {
                    return false;
                }
                match self.state {
                    StreamState::HalfClosedLocal => self.enter_closed(Ok(())).await,
                    _ => self.enter_half_closed_remote().await,
                }
            }

            StreamEvent::PushPromise { entries } => {
                if self.state != StreamState::Idle {
                    debug!(stream_id = %self.id, state = ?self.state, "push promise ignored outside idle");
                    return false;
                }
                self.state = StreamState::ReservedRemote;
                let push = PushPromise {
                    stream_id: self.id,
                    headers: entries,
                };
                if self.delivery_tx.send(Delivery::Push(push)).await.is_err() {
                    debug!(stream_id = %self.id, "push recipient gone");
                }
                false
            }

            StreamEvent::Reset { code } => {
                if self.state == StreamState::Closed {
                    debug!(stream_id = %self.id, "reset for closed stream ignored");
                    return false;
                }
                let outcome = match KnownErrorCode::try_from(code) {
                    Ok(KnownErrorCode::NoError) => Ok(()),
                    _ => Err(H2StreamError::Reset { code }),
                };
                self.enter_closed(outcome).await
            }

            StreamEvent::WindowUpdate { increment } => {
                if self.state == StreamState::Closed {
                    debug!(stream_id = %self.id, "window update for closed stream ignored");
                    return false;
                }
                self.apply_window_change(increment as i64).await
            }

            StreamEvent::SettingsChanged {
                window_delta,
                max_frame_size,
            } => {
                self.flow.set_max_frame_size(max_frame_size);
                self.apply_window_change(window_delta).await
            }

            StreamEvent::Close => {
                // explicit local cancellation: terminate immediately,
                // pending sends are not flushed, nothing is delivered
                debug!(stream_id = %self.id, "stream cancelled locally");
                self.state = StreamState::Closed;
                self.delivered = true;
                true
            }
        }
    }

    /// Encode and send the request headers through the dispatcher,
    /// queue the body through flow control, and flush whatever the
    /// window already permits.
    async fn send_request(
        &mut self,
        headers: HeaderList,
        body: Option<Bytes>,
        ack: oneshot::Sender<Result<StreamId, RequestError>>,
    ) -> bool {
        if self.state != StreamState::Idle {
            debug!(stream_id = %self.id, state = ?self.state, "send_request outside idle ignored");
            return false;
        }

        let end_stream = body.is_none();
        if !self
            .send_conn(ConnEvent::SendHeaders {
                stream_id: self.id,
                headers,
                end_stream,
            })
            .await
        {
            let _ = ack.send(Err(RequestError::ConnectionClosed));
            return true;
        }
        self.state = StreamState::Open;
        let _ = ack.send(Ok(self.id));

        match body {
            Some(body) => {
                self.flow.enqueue(body, true);
                self.flush().await
            }
            None => false,
        }
    }

    async fn apply_window_change(&mut self, delta: i64) -> bool {
        match self.flow.increment_window(delta) {
            Ok(()) => self.flush().await,
            Err(err) => {
                debug!(stream_id = %self.id, %err, "window overflow, resetting stream");
                let _ = self
                    .send_conn(ConnEvent::SendRst {
                        stream_id: self.id,
                        code: KnownErrorCode::FlowControlError.into(),
                    })
                    .await;
                self.enter_closed(Err(H2StreamError::WindowUpdateOverflow))
                    .await
            }
        }
    }

    /// Send every chunk the window currently covers, in FIFO order.
    async fn flush(&mut self) -> bool {
        for chunk in self.flow.take_sendable() {
            let end_stream = chunk.end_stream;
            if !self
                .send_conn(ConnEvent::SendData {
                    stream_id: self.id,
                    chunk: chunk.payload,
                    end_stream,
                })
                .await
            {
                return true;
            }
            if end_stream && self.state == StreamState::Open {
                // the request body is fully on the wire
                self.state = StreamState::HalfClosedLocal;
            }
        }
        false
    }

    /// On-entry action for half-closed (remote): the exchange is over
    /// from our side's perspective, so reset the stream to release
    /// peer state, then close and deliver.
    async fn enter_half_closed_remote(&mut self) -> bool {
        self.state = StreamState::HalfClosedRemote;
        let _ = self
            .send_conn(ConnEvent::SendRst {
                stream_id: self.id,
                code: KnownErrorCode::Cancel.into(),
            })
            .await;
        self.enter_closed(Ok(())).await
    }

    /// On-entry action for closed: deliver the aggregated response (or
    /// the failure) exactly once, tell the dispatcher to forget us, and
    /// terminate.
    async fn enter_closed(&mut self, outcome: Result<(), H2StreamError>) -> bool {
        self.state = StreamState::Closed;

        if !self.delivered {
            self.delivered = true;
            match outcome {
                Ok(()) => {
                    let status = status_of(&self.headers);
                    let response = Response {
                        stream_id: self.id,
                        status,
                        headers: std::mem::take(&mut self.headers),
                        body: std::mem::take(&mut self.body).freeze(),
                    };
                    debug!(stream_id = %self.id, ?response, "delivering response");
                    match self.response_tx.take() {
                        Some(tx) => {
                            let _ = tx.send(Ok(response));
                        }
                        None => {
                            let _ = self.delivery_tx.send(Delivery::Response(response)).await;
                        }
                    }
                }
                Err(err) => {
                    debug!(stream_id = %self.id, %err, "delivering stream failure");
                    let code = err.as_error_code();
                    match self.response_tx.take() {
                        Some(tx) => {
                            let _ = tx.send(Err(err));
                        }
                        None => {
                            let _ = self
                                .delivery_tx
                                .send(Delivery::StreamError {
                                    stream_id: self.id,
                                    code,
                                })
                                .await;
                        }
                    }
                }
            }
        }

        let _ = self
            .conn_tx
            .send(ConnEvent::StreamDone { stream_id: self.id })
            .await;
        true
    }

    /// Send a command to the dispatcher; false means the connection is
    /// gone and the stream should wind down.
    async fn send_conn(&self, ev: ConnEvent) -> bool {
        if self.conn_tx.send(ev).await.is_err() {
            debug!(stream_id = %self.id, "connection dispatcher gone");
            return false;
        }
        true
    }
}
