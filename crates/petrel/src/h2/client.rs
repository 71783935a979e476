//! The connection dispatcher: reads and routes h2 frames to per-stream
//! state machines, and is the single owner of the transport write half
//! and both header-compression directions.
//!
//! All hpack use is serialized here: inbound header blocks are decoded
//! in transport arrival order by the read loop, and outbound
//! `SendHeaders` commands are encoded and written in channel order.
//! Streams never touch the tables — that is what keeps the shared
//! dynamic-table state coherent.

use std::collections::HashMap;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use petrel_h2::{
    deframe, enumflags2::BitFlags, goaway, ping_ack, rst_stream, settings_ack,
    settings_frame_with, ContinuationFlags, DataFlags, ErrorCode, Frame, FrameDecodeError,
    FrameType, HeadersFlags, PingFlags, PrioritySpec, PushPromiseFlags, Setting, SettingPairs,
    Settings, SettingsFlags, StreamId, WindowUpdate, FRAME_HEADER_LEN, PREFACE,
};

use crate::error::RequestError;
use crate::h2::stream::Stream;
use crate::h2::types::{ConnEvent, H2ConnectionError, H2StreamError, StartRequest, StreamEvent};
use crate::transport::{TransportError, TransportRx, TransportTx};
use crate::{Delivery, HeaderList, Response};

/// HTTP/2 client connection configuration.
pub struct ClientConf {
    pub header_table_size: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_concurrent_streams: Option<u32>,

    /// Bound on any blocking wait for transport data. Exceeding it
    /// fails the wait with [TransportError::Timeout]; retry policy is
    /// the caller's concern.
    pub receive_timeout: Duration,
}

impl Default for ClientConf {
    fn default() -> Self {
        let defaults = Settings::default();
        Self {
            header_table_size: defaults.header_table_size,
            initial_window_size: defaults.initial_window_size,
            max_frame_size: defaults.max_frame_size,
            max_concurrent_streams: Some(32),
            receive_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConf {
    fn self_settings(&self) -> Settings {
        Settings {
            header_table_size: self.header_table_size,
            initial_window_size: self.initial_window_size,
            max_frame_size: self.max_frame_size,
            max_concurrent_streams: self.max_concurrent_streams,
            ..Settings::default()
        }
    }
}

/// A handle to a live HTTP/2 client connection.
///
/// Cheap to use from many tasks: requests and cancellations go through
/// the dispatcher's command channel.
pub struct H2Connection {
    conn_tx: mpsc::Sender<ConnEvent>,
    task: tokio::task::JoinHandle<Result<(), H2ConnectionError>>,
}

/// The pending response for one issued request.
pub struct ResponseHandle {
    pub stream_id: StreamId,
    rx: oneshot::Receiver<Result<Response, H2StreamError>>,
}

impl ResponseHandle {
    /// Wait for the stream to complete and deliver its aggregated
    /// response.
    pub async fn response(self) -> Result<Response, crate::error::ResponseError> {
        match self.rx.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(crate::error::ResponseError::ConnectionClosed),
        }
    }
}

impl H2Connection {
    /// Perform the client handshake (preface plus initial SETTINGS)
    /// and spawn the connection dispatcher.
    ///
    /// Returns the connection handle and the delivery channel on which
    /// responses without a per-request callback, push notifications,
    /// and stream failures arrive.
    pub async fn establish<Rx, Tx>(
        transport_rx: Rx,
        mut transport_tx: Tx,
        conf: ClientConf,
    ) -> Result<(Self, mpsc::Receiver<Delivery>), H2ConnectionError>
    where
        Rx: TransportRx + Send + 'static,
        Tx: TransportTx + Send + 'static,
    {
        let self_settings = conf.self_settings();

        let mut hello = BytesMut::with_capacity(PREFACE.len() + 64);
        hello.extend_from_slice(PREFACE);
        hello.extend_from_slice(&settings_frame_with(SettingPairs(&[
            (Setting::HeaderTableSize, self_settings.header_table_size),
            (
                Setting::InitialWindowSize,
                self_settings.initial_window_size,
            ),
            (
                Setting::MaxConcurrentStreams,
                self_settings.max_concurrent_streams.unwrap_or(u32::MAX),
            ),
            (Setting::MaxFrameSize, self_settings.max_frame_size),
        ])));
        debug!("sending preface and initial settings");
        transport_tx.send(hello.freeze()).await?;

        let (conn_tx, conn_rx) = mpsc::channel::<ConnEvent>(32);
        let (delivery_tx, delivery_rx) = mpsc::channel::<Delivery>(32);

        let mut hpack_dec = petrel_hpack::Decoder::new();
        hpack_dec.set_max_allowed_table_size(self_settings.header_table_size as usize);

        let cx = ClientContext {
            transport_tx,
            hpack_dec,
            hpack_enc: petrel_hpack::Encoder::new(),
            self_settings,
            peer_settings: Settings::default(),
            streams: HashMap::new(),
            next_stream_id: 1,
            last_peer_stream_id: StreamId::CONNECTION,
            receive_timeout: conf.receive_timeout,
            conn_tx: conn_tx.clone(),
            conn_rx,
            delivery_tx,
            goaway_recv: false,
        };
        let task = tokio::spawn(cx.work(transport_rx));

        Ok((Self { conn_tx, task }, delivery_rx))
    }

    /// Issue a request. Blocks until the stream instance acknowledges
    /// receipt — not until the response completes; await the returned
    /// handle for that.
    pub async fn request(
        &self,
        headers: HeaderList,
        body: Option<Bytes>,
    ) -> Result<ResponseHandle, RequestError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();
        self.conn_tx
            .send(ConnEvent::StartRequest(StartRequest {
                headers,
                body,
                ack: ack_tx,
                response: response_tx,
            }))
            .await
            .map_err(|_| RequestError::ConnectionClosed)?;

        let stream_id = ack_rx
            .await
            .map_err(|_| RequestError::ConnectionClosed)??;
        Ok(ResponseHandle {
            stream_id,
            rx: response_rx,
        })
    }

    /// Cancel a stream: its instance terminates immediately, without
    /// flushing pending sends and without delivering anything.
    pub async fn close_stream(&self, stream_id: StreamId) -> Result<(), RequestError> {
        self.conn_tx
            .send(ConnEvent::CloseStream { stream_id })
            .await
            .map_err(|_| RequestError::ConnectionClosed)
    }

    /// Wait for the connection dispatcher to finish.
    pub async fn join(self) -> Result<(), H2ConnectionError> {
        match self.task.await {
            Ok(res) => res,
            Err(_) => Err(H2ConnectionError::TaskFailed),
        }
    }
}

/// What one call to [read_frame] can surface.
enum Inbound {
    Frame(Frame, Bytes),
    Reset {
        stream_id: StreamId,
        error_code: ErrorCode,
    },
    GoAway {
        last_stream_id: StreamId,
        error_code: ErrorCode,
    },
}

/// Reads and processes h2 frames from the server, and executes
/// commands from streams and the client handle.
struct ClientContext<Tx: TransportTx> {
    transport_tx: Tx,

    hpack_dec: petrel_hpack::Decoder<'static>,
    hpack_enc: petrel_hpack::Encoder<'static>,

    self_settings: Settings,
    peer_settings: Settings,

    streams: HashMap<StreamId, mpsc::Sender<StreamEvent>>,

    /// Next odd id handed to a locally initiated stream.
    next_stream_id: u32,

    /// Highest server-initiated stream id seen, reported in GOAWAY.
    last_peer_stream_id: StreamId,

    receive_timeout: Duration,

    conn_tx: mpsc::Sender<ConnEvent>,
    conn_rx: mpsc::Receiver<ConnEvent>,
    delivery_tx: mpsc::Sender<Delivery>,

    /// Whether we've received a GOAWAY frame.
    goaway_recv: bool,
}

impl<Tx: TransportTx> ClientContext<Tx> {
    async fn work(mut self, mut transport_rx: impl TransportRx) -> Result<(), H2ConnectionError> {
        let mut read_buf = BytesMut::new();
        let res = self.run_loop(&mut transport_rx, &mut read_buf).await;

        if let Err(err) = &res {
            match err {
                // the peer is gone or told us to go; nothing to send
                H2ConnectionError::Transport(_) | H2ConnectionError::GoAway { .. } => {}
                err => {
                    let error_code = err.as_known_error_code();
                    debug!(%err, ?error_code, "connection error, sending GOAWAY");
                    let _ = self
                        .transport_tx
                        .send(Bytes::from(goaway(
                            self.last_peer_stream_id,
                            error_code.into(),
                        )))
                        .await;
                }
            }
        }
        res
    }

    async fn run_loop(
        &mut self,
        transport_rx: &mut impl TransportRx,
        read_buf: &mut BytesMut,
    ) -> Result<(), H2ConnectionError> {
        loop {
            let receive_timeout = self.receive_timeout;
            let max_frame_size = self.self_settings.max_frame_size;

            tokio::select! {
                biased;

                maybe_ev = self.conn_rx.recv() => {
                    match maybe_ev {
                        Some(ev) => self.handle_event(ev).await?,
                        None => unreachable!("the context owns a copy of the sender, so the channel cannot close"),
                    }
                }

                inbound = read_frame(transport_rx, read_buf, receive_timeout, max_frame_size) => {
                    match inbound? {
                        Some(inbound) => self.process_inbound(inbound).await?,
                        None => {
                            debug!("peer hung up");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn process_inbound(&mut self, inbound: Inbound) -> Result<(), H2ConnectionError> {
        match inbound {
            Inbound::Reset {
                stream_id,
                error_code,
            } => {
                debug!(%stream_id, ?error_code, "peer reset stream");
                self.route(stream_id, StreamEvent::Reset { code: error_code })
                    .await;
                Ok(())
            }

            Inbound::GoAway {
                last_stream_id,
                error_code,
            } => {
                self.goaway_recv = true;
                debug!(%last_stream_id, ?error_code, "received GOAWAY, closing all streams");
                let ids: Vec<StreamId> = self.streams.keys().copied().collect();
                for id in ids {
                    self.route(id, StreamEvent::Reset { code: error_code }).await;
                }
                Err(H2ConnectionError::GoAway {
                    last_stream_id,
                    error_code,
                })
            }

            Inbound::Frame(frame, payload) => self.process_frame(frame, payload).await,
        }
    }

    async fn process_frame(
        &mut self,
        frame: Frame,
        payload: Bytes,
    ) -> Result<(), H2ConnectionError> {
        match frame.frame_type {
            FrameType::Data(flags) => {
                if frame.stream_id == StreamId::CONNECTION {
                    return Err(H2ConnectionError::StreamSpecificFrameToConnection {
                        frame_type: frame.frame_type,
                    });
                }
                let payload =
                    strip_padding(frame.frame_type, flags.contains(DataFlags::Padded), payload)?;
                self.route(
                    frame.stream_id,
                    StreamEvent::Data {
                        chunk: payload,
                        end_stream: flags.contains(DataFlags::EndStream),
                    },
                )
                .await;
            }

            FrameType::Headers(flags) => {
                if frame.stream_id == StreamId::CONNECTION {
                    return Err(H2ConnectionError::StreamSpecificFrameToConnection {
                        frame_type: frame.frame_type,
                    });
                }
                let payload = strip_padding(
                    frame.frame_type,
                    flags.contains(HeadersFlags::Padded),
                    payload,
                )?;

                let mut fragment = &payload[..];
                if flags.contains(HeadersFlags::Priority) {
                    let (rest, pri_spec) = PrioritySpec::parse(fragment).map_err(|_| {
                        H2ConnectionError::MalformedPayload {
                            frame_type: frame.frame_type,
                        }
                    })?;
                    debug!(?pri_spec, "headers carried a priority spec");
                    fragment = rest;
                }

                // decoded here, in arrival order: the decode direction
                // of the compression context lives with this loop
                let entries = self.hpack_dec.decode(fragment)?;
                self.route_or_create(
                    frame.stream_id,
                    StreamEvent::Headers {
                        entries,
                        end_stream: flags.contains(HeadersFlags::EndStream),
                    },
                )
                .await;
            }

            FrameType::Continuation(_flags) => {
                if frame.stream_id == StreamId::CONNECTION {
                    return Err(H2ConnectionError::StreamSpecificFrameToConnection {
                        frame_type: frame.frame_type,
                    });
                }
                let entries = self.hpack_dec.decode(&payload)?;
                self.route(
                    frame.stream_id,
                    StreamEvent::Headers {
                        entries,
                        end_stream: false,
                    },
                )
                .await;
            }

            FrameType::PushPromise(flags) => {
                let payload = strip_padding(
                    frame.frame_type,
                    flags.contains(PushPromiseFlags::Padded),
                    payload,
                )?;
                if payload.len() < 4 {
                    return Err(H2ConnectionError::MalformedPayload {
                        frame_type: frame.frame_type,
                    });
                }
                let promised = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                    & 0x7fff_ffff;
                let entries = self.hpack_dec.decode(&payload[4..])?;
                debug!(promised_stream_id = %promised, "peer promised a push");
                self.route_or_create(StreamId(promised), StreamEvent::PushPromise { entries })
                    .await;
            }

            FrameType::Settings(flags) => {
                if frame.stream_id != StreamId::CONNECTION {
                    return Err(H2ConnectionError::SettingsWithNonZeroStreamId {
                        stream_id: frame.stream_id,
                    });
                }
                if flags.contains(SettingsFlags::Ack) {
                    if !payload.is_empty() {
                        return Err(H2ConnectionError::SettingsInvalidLength {
                            len: payload.len(),
                        });
                    }
                    debug!("our settings were acknowledged");
                } else {
                    let old_initial_window = self.peer_settings.initial_window_size;
                    self.peer_settings.parse_payload(&payload)?;
                    debug!(settings = ?self.peer_settings, "peer settings updated");

                    // the encode direction's table bound follows the
                    // peer's advertised header table size
                    self.hpack_enc
                        .set_max_table_size(self.peer_settings.header_table_size as usize);

                    // live streams learn the new window and frame size
                    // without interrupting in-flight state
                    let window_delta = self.peer_settings.initial_window_size as i64
                        - old_initial_window as i64;
                    let max_frame_size = self.peer_settings.max_frame_size;
                    let ids: Vec<StreamId> = self.streams.keys().copied().collect();
                    for id in ids {
                        self.route(
                            id,
                            StreamEvent::SettingsChanged {
                                window_delta,
                                max_frame_size,
                            },
                        )
                        .await;
                    }

                    self.write_bytes(settings_ack()).await?;
                }
            }

            FrameType::Ping(flags) => {
                if frame.stream_id != StreamId::CONNECTION {
                    return Err(H2ConnectionError::PingFrameWithNonZeroStreamId {
                        stream_id: frame.stream_id,
                    });
                }
                if payload.len() != 8 {
                    return Err(H2ConnectionError::PingFrameInvalidLength {
                        len: payload.len(),
                    });
                }
                if flags.contains(PingFlags::Ack) {
                    debug!("pong");
                } else {
                    let mut opaque = [0u8; 8];
                    opaque.copy_from_slice(&payload);
                    self.write_bytes(ping_ack(opaque)).await?;
                }
            }

            FrameType::WindowUpdate => {
                if payload.len() != 4 {
                    return Err(H2ConnectionError::WindowUpdateInvalidLength {
                        len: payload.len(),
                    });
                }
                let (_, update) = WindowUpdate::parse(&payload).map_err(|_| {
                    H2ConnectionError::MalformedPayload {
                        frame_type: frame.frame_type,
                    }
                })?;
                if frame.stream_id == StreamId::CONNECTION {
                    // this engine accounts flow control per stream only
                    debug!(
                        increment = update.increment,
                        "connection-level window update ignored"
                    );
                } else {
                    self.route(
                        frame.stream_id,
                        StreamEvent::WindowUpdate {
                            increment: update.increment,
                        },
                    )
                    .await;
                }
            }

            FrameType::Priority => {
                match PrioritySpec::parse(&payload) {
                    Ok((_, pri_spec)) => debug!(?pri_spec, "ignoring priority frame"),
                    Err(_) => debug!("ignoring malformed priority frame"),
                };
            }

            FrameType::RstStream | FrameType::GoAway => {
                unreachable!("deframe surfaces these as failure signals")
            }

            FrameType::Unknown(eft) => {
                debug!(ty = eft.ty, flags = eft.flags, "ignoring unknown frame type");
            }
        }

        Ok(())
    }

    async fn handle_event(&mut self, ev: ConnEvent) -> Result<(), H2ConnectionError> {
        trace!(?ev, "connection event");
        match ev {
            ConnEvent::StartRequest(req) => self.start_request(req).await,

            ConnEvent::SendHeaders {
                stream_id,
                headers,
                end_stream,
            } => {
                // encoded here, in command order: the encode direction
                // of the compression context lives with this loop
                let block = self
                    .hpack_enc
                    .encode(headers.iter().map(|(n, v)| (n.as_slice(), v.as_slice())));
                self.write_header_block(stream_id, block, end_stream).await
            }

            ConnEvent::SendData {
                stream_id,
                chunk,
                end_stream,
            } => {
                let mut flags = BitFlags::<DataFlags>::default();
                if end_stream {
                    flags |= DataFlags::EndStream;
                }
                self.write_frame(Frame::new(FrameType::Data(flags), stream_id), &chunk)
                    .await
            }

            ConnEvent::SendRst { stream_id, code } => {
                debug!(%stream_id, ?code, "sending RST_STREAM");
                self.write_bytes(rst_stream(stream_id, code)).await
            }

            ConnEvent::StreamDone { stream_id } => {
                if self.streams.remove(&stream_id).is_some() {
                    debug!(
                        %stream_id,
                        streams = self.streams.len(),
                        "stream done"
                    );
                }
                Ok(())
            }

            ConnEvent::CloseStream { stream_id } => {
                if let Some(ev_tx) = self.streams.remove(&stream_id) {
                    let _ = ev_tx.send(StreamEvent::Close).await;
                    debug!(%stream_id, "stream cancelled");
                }
                Ok(())
            }
        }
    }

    async fn start_request(&mut self, req: StartRequest) -> Result<(), H2ConnectionError> {
        if self.goaway_recv {
            let _ = req.ack.send(Err(RequestError::ConnectionClosed));
            return Ok(());
        }
        if let Some(max) = self.peer_settings.max_concurrent_streams {
            if self.streams.len() >= max as usize {
                let _ = req.ack.send(Err(RequestError::RefusedStream));
                return Ok(());
            }
        }

        let stream_id = StreamId(self.next_stream_id);
        self.next_stream_id += 2;

        let ev_tx = self.spawn_stream(stream_id, Some(req.response));
        let _ = ev_tx
            .send(StreamEvent::SendRequest {
                headers: req.headers,
                body: req.body,
                ack: req.ack,
            })
            .await;
        debug!(%stream_id, streams = self.streams.len(), "started request stream");
        Ok(())
    }

    /// Create a stream instance and its task. Initial flow-control
    /// state comes from the peer's current settings.
    fn spawn_stream(
        &mut self,
        stream_id: StreamId,
        response_tx: Option<oneshot::Sender<Result<Response, H2StreamError>>>,
    ) -> mpsc::Sender<StreamEvent> {
        let (ev_tx, ev_rx) = mpsc::channel::<StreamEvent>(32);
        let stream = Stream::new(
            stream_id,
            self.peer_settings.initial_window_size,
            self.peer_settings.max_frame_size,
            self.conn_tx.clone(),
            self.delivery_tx.clone(),
            response_tx,
        );
        tokio::spawn(stream.run(ev_rx));
        self.streams.insert(stream_id, ev_tx.clone());
        ev_tx
    }

    /// Route an event to an existing stream; frames for unknown
    /// streams are logged and dropped, preserving liveness.
    async fn route(&mut self, stream_id: StreamId, ev: StreamEvent) {
        let ev_tx = match self.streams.get(&stream_id) {
            Some(ev_tx) => ev_tx.clone(),
            None => {
                debug!(%stream_id, ?ev, "frame for unknown stream ignored");
                return;
            }
        };
        if ev_tx.send(ev).await.is_err() {
            debug!(%stream_id, "stream task gone, dropping handle");
            self.streams.remove(&stream_id);
        }
    }

    /// Route a header-bearing event, creating the stream instance on
    /// first reference (this is how pushed streams come to exist).
    async fn route_or_create(&mut self, stream_id: StreamId, ev: StreamEvent) {
        if !self.streams.contains_key(&stream_id) {
            if stream_id.is_server_initiated() && stream_id > self.last_peer_stream_id {
                self.last_peer_stream_id = stream_id;
            }
            self.spawn_stream(stream_id, None);
            debug!(%stream_id, streams = self.streams.len(), "created stream on first reference");
        }
        self.route(stream_id, ev).await;
    }

    /// Write a header block as a HEADERS frame, splitting into
    /// CONTINUATION frames when it exceeds the peer's max frame size.
    async fn write_header_block(
        &mut self,
        stream_id: StreamId,
        block: Vec<u8>,
        end_stream: bool,
    ) -> Result<(), H2ConnectionError> {
        let max = self.peer_settings.max_frame_size as usize;
        let mut rest = Bytes::from(block);
        let mut first = true;

        loop {
            let take = rest.len().min(max);
            let piece = rest.split_to(take);
            let last = rest.is_empty();

            let frame_type = if first {
                let mut flags = BitFlags::<HeadersFlags>::default();
                if last {
                    flags |= HeadersFlags::EndHeaders;
                }
                if end_stream {
                    flags |= HeadersFlags::EndStream;
                }
                FrameType::Headers(flags)
            } else {
                let mut flags = BitFlags::<ContinuationFlags>::default();
                if last {
                    flags |= ContinuationFlags::EndHeaders;
                }
                FrameType::Continuation(flags)
            };

            self.write_frame(Frame::new(frame_type, stream_id), &piece)
                .await?;
            first = false;
            if last {
                return Ok(());
            }
        }
    }

    async fn write_frame(
        &mut self,
        frame: Frame,
        payload: &[u8],
    ) -> Result<(), H2ConnectionError> {
        let frame = frame.with_len(payload.len() as u32);
        debug!(?frame, ">");
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame
            .write_into(&mut out)
            .map_err(H2ConnectionError::WriteError)?;
        out.extend_from_slice(payload);
        self.transport_tx.send(Bytes::from(out)).await?;
        Ok(())
    }

    async fn write_bytes(&mut self, bytes: Vec<u8>) -> Result<(), H2ConnectionError> {
        trace!(len = bytes.len(), "writing raw frame bytes");
        self.transport_tx.send(Bytes::from(bytes)).await?;
        Ok(())
    }
}

/// Accumulate transport chunks until one whole frame is buffered, then
/// split it off. `Ok(None)` means the peer hung up cleanly between
/// frames.
///
/// Cancel-safe as long as the transport's `receive` is: partial frames
/// stay in `read_buf` across calls.
async fn read_frame(
    transport_rx: &mut impl TransportRx,
    read_buf: &mut BytesMut,
    receive_timeout: Duration,
    max_frame_size: u32,
) -> Result<Option<Inbound>, H2ConnectionError> {
    loop {
        if read_buf.len() >= FRAME_HEADER_LEN {
            let (_, header) = Frame::parse(&read_buf[..])
                .map_err(|_| H2ConnectionError::BadFrame(FrameDecodeError::MalformedHeader))?;
            if header.len > max_frame_size {
                return Err(H2ConnectionError::FrameTooLarge {
                    frame_type: header.frame_type,
                    frame_size: header.len,
                    max_frame_size,
                });
            }
            let total = FRAME_HEADER_LEN + header.len as usize;
            if read_buf.len() >= total {
                let frame_bytes = read_buf.split_to(total);
                return match deframe(&frame_bytes) {
                    Ok(decoded) => {
                        debug!(frame = ?decoded.frame, "<");
                        Ok(Some(Inbound::Frame(decoded.frame, decoded.payload)))
                    }
                    Err(FrameDecodeError::StreamReset {
                        stream_id,
                        error_code,
                    }) => Ok(Some(Inbound::Reset {
                        stream_id,
                        error_code,
                    })),
                    Err(FrameDecodeError::GoAway {
                        last_stream_id,
                        error_code,
                        ..
                    }) => Ok(Some(Inbound::GoAway {
                        last_stream_id,
                        error_code,
                    })),
                    Err(e) => Err(H2ConnectionError::BadFrame(e)),
                };
            }
        }

        // not a full frame yet; wait (bounded) for more bytes
        let chunk = match tokio::time::timeout(receive_timeout, transport_rx.receive()).await {
            Err(_) => return Err(TransportError::Timeout.into()),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(None)) => {
                if read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(H2ConnectionError::IncompleteFrame {
                    buffered: read_buf.len(),
                });
            }
            Ok(Ok(Some(chunk))) => chunk,
        };
        read_buf.extend_from_slice(&chunk);
    }
}

/// Strip the padding-length octet and trailing padding from a padded
/// DATA/HEADERS/PUSH_PROMISE payload.
fn strip_padding(
    frame_type: FrameType,
    padded: bool,
    payload: Bytes,
) -> Result<Bytes, H2ConnectionError> {
    if !padded {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(H2ConnectionError::PaddedFrameEmpty { frame_type });
    }
    let padding_length = payload[0] as usize;
    let rest = payload.slice(1..);
    if rest.len() < padding_length {
        return Err(H2ConnectionError::PaddedFrameTooShort {
            frame_type,
            padding_length,
            frame_size: payload.len(),
        });
    }
    let keep = rest.len() - padding_length;
    Ok(rest.slice(..keep))
}
