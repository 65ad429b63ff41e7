//! # HTTP Long-Poll Transport
//!
//! Request/response transport for peers that cannot keep a raw socket open.
//! Requests are parsed and answered by hyper; this module only decides what
//! each request means.
//!
//! ## Exchange
//! ```text
//! POST (no id header)  body: [MAGIC][logged in][HandshakeRequest]
//!                      200   body: HandshakeResponse, header carries the id
//! POST (id header)     body: ([len: u32 BE][frame])*
//!                      200   body: ([len: u32 BE][frame])*  frames queued for the peer
//!                      204   nothing to deliver
//! ```
//!
//! Frames written to an HTTP connection are queued until the peer sends a
//! `PollingRequest` message; the request carrying the poll is then held open
//! until frames arrive or the poll timeout passes. A peer that stops polling
//! for [`IDLE_POLL_TIMEOUTS`] poll timeouts is closed.

use crate::config::ServerConfig;
use crate::connection::context::{message_frame, raw_frame, ConnectionContext, WriteFuture};
use crate::connection::{Channel, Connection, ConnectionManager, PollResponder};
use crate::core::buffer::{Decoder as WireDecoder, Encoder as WireEncoder};
use crate::error::{ProtocolError, Result};
use crate::negotiation::BoxedIo;
use crate::protocol::handshake::{encode_handshake_response, read_handshake, HandshakeResponse};
use crate::protocol::message::{Identifier, Message};
use crate::serialization::{Protocol, Value};
use crate::transport::Transport;
use crate::utils::buffer_pool::BufferPool;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::future::{self, FutureExt};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, instrument, warn};

/// Header carrying the connection identity after the handshake
pub const CONNECTION_ID_HEADER: &str = "x-wirelink-connection-id";

/// Poll timeouts without a poll before a logical connection is closed
pub const IDLE_POLL_TIMEOUTS: u32 = 3;

type HttpResponse = Response<Full<Bytes>>;

fn reply(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn reply_with(body: Bytes) -> HttpResponse {
    let mut response = Response::new(Full::new(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    response
}

type Ack = oneshot::Sender<Result<()>>;

#[derive(Default)]
struct PollState {
    queue: VecDeque<(Bytes, Ack)>,
    parked: Option<oneshot::Sender<Bytes>>,
}

impl PollState {
    /// Hand every queued frame to `responder`. Frames stay queued when the
    /// request behind it has already gone away.
    fn deliver(&mut self, responder: oneshot::Sender<Bytes>) {
        let frames: Vec<(Bytes, Ack)> = self.queue.drain(..).collect();
        let mut body = BytesMut::with_capacity(frames.iter().map(|(f, _)| 4 + f.len()).sum());
        for (frame, _) in &frames {
            body.put_u32(frame.len() as u32);
            body.put_slice(frame);
        }
        match responder.send(body.freeze()) {
            Ok(()) => {
                for (_, ack) in frames {
                    let _ = ack.send(Ok(()));
                }
            }
            Err(_) => {
                for entry in frames.into_iter().rev() {
                    self.queue.push_front(entry);
                }
            }
        }
    }
}

/// Context for one logical HTTP long-poll connection.
pub struct HttpConnectionContext {
    protocol: Arc<Protocol>,
    pool: BufferPool,
    state: Mutex<PollState>,
    /// Handshake or most recent poll
    last_poll: Mutex<Instant>,
    closed: AtomicBool,
}

impl HttpConnectionContext {
    pub fn new(protocol: Arc<Protocol>, pool_size: usize) -> Self {
        Self {
            protocol,
            pool: BufferPool::new(pool_size),
            state: Mutex::new(PollState::default()),
            last_poll: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
        }
    }

    /// Frames waiting for the next poll
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).queue.len()
    }

    /// Time since the peer last polled, or `None` while a poll is parked.
    pub fn idle_for(&self) -> Option<Duration> {
        let parked = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.parked.as_ref().is_some_and(|responder| !responder.is_closed())
        };
        if parked {
            return None;
        }
        Some(self.last_poll.lock().unwrap_or_else(PoisonError::into_inner).elapsed())
    }

    fn enqueue(&self, frame: Result<Bytes>) -> WriteFuture {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        if self.is_closed() {
            return future::ready(Err(ProtocolError::ConnectionClosed)).boxed();
        }

        let (ack, done) = oneshot::channel();
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.queue.push_back((frame, ack));
            if let Some(responder) = state.parked.take() {
                state.deliver(responder);
            }
        }
        async move { done.await.map_err(|_| ProtocolError::ConnectionClosed)? }.boxed()
    }
}

impl ConnectionContext for HttpConnectionContext {
    fn transport(&self) -> Transport {
        Transport::Http
    }

    fn write_message(&self, message: Message) -> WriteFuture {
        self.enqueue(message_frame(&self.protocol, &self.pool, &message))
    }

    fn write_raw(&self, payload: Bytes, metadata: Option<Arc<dyn Value>>) -> WriteFuture {
        self.enqueue(raw_frame(&self.protocol, &self.pool, &payload, metadata.as_deref()))
    }

    fn close(&self) -> WriteFuture {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            for (_, ack) in state.queue.drain(..) {
                let _ = ack.send(Err(ProtocolError::ConnectionClosed));
            }
            state.parked = None;
        }
        future::ready(Ok(())).boxed()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn process_polling_request(&self, channel: &Channel, _message: &Message) -> Result<()> {
        let Channel::Request(responder) = channel else {
            return Err(ProtocolError::HttpError("poll outside of a request".into()));
        };
        let Some(responder) = responder.claim() else {
            return Err(ProtocolError::HttpError("request already answered".into()));
        };
        *self.last_poll.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.queue.is_empty() {
            // an older poll still parked is answered empty
            state.parked = Some(responder);
        } else {
            state.deliver(responder);
        }
        Ok(())
    }
}

/// Per-server HTTP limits.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub max_content_length: usize,
    pub max_frame_size: usize,
    pub poll_timeout: Duration,
    pub buffer_pool_size: usize,
}

impl HttpSettings {
    pub fn new(server: &ServerConfig, max_frame_size: usize, buffer_pool_size: usize) -> Self {
        Self {
            max_content_length: server.max_http_content_length,
            max_frame_size,
            poll_timeout: server.poll_timeout,
            buffer_pool_size,
        }
    }

    /// How long a logical connection may go without polling
    pub fn idle_timeout(&self) -> Duration {
        self.poll_timeout * IDLE_POLL_TIMEOUTS
    }
}

/// Split a request body into frames.
fn split_frames(mut body: Bytes, max_frame_size: usize) -> Result<Vec<Bytes>> {
    let mut frames = Vec::new();
    while body.has_remaining() {
        if body.len() < 4 {
            return Err(ProtocolError::Incomplete);
        }
        let len = body.get_u32() as usize;
        if len > max_frame_size {
            return Err(ProtocolError::OversizedFrame(len));
        }
        if body.len() < len {
            return Err(ProtocolError::Incomplete);
        }
        frames.push(body.split_to(len));
    }
    Ok(frames)
}

/// Close `connection` once its peer has not polled for `limit`.
async fn expire_when_idle(connection: Arc<Connection>, context: Arc<HttpConnectionContext>, limit: Duration) {
    loop {
        if context.is_closed() {
            return;
        }
        match context.idle_for() {
            Some(idle) if idle >= limit => break,
            Some(idle) => sleep(limit - idle).await,
            None => sleep(limit).await,
        }
    }
    let identity = connection.identity();
    info!(%identity, ?limit, "Closing idle HTTP connection");
    if let Err(error) = connection.close().await {
        debug!(%identity, %error, "Close failed");
    }
}

fn handshake(manager: &ConnectionManager, settings: &HttpSettings, body: &[u8]) -> Result<HttpResponse> {
    let protocol = manager.protocol();
    let hello = read_handshake(protocol, &mut WireDecoder::new(body))?;
    let identity = hello.assign_identity();

    let context = Arc::new(HttpConnectionContext::new(Arc::clone(protocol), settings.buffer_pool_size));
    let shared: Arc<dyn ConnectionContext> = context.clone();
    let connection = manager.assign_connection(identity, Arc::clone(&shared), Transport::Http)?;
    if !connection.uses_context(&shared) {
        warn!(%identity, "Identity already connected");
        return Ok(reply(StatusCode::CONFLICT));
    }
    tokio::spawn(expire_when_idle(connection, context, settings.idle_timeout()));

    let mut body = BytesMut::new();
    encode_handshake_response(
        protocol,
        &HandshakeResponse {
            connection_id: identity,
        },
        &mut WireEncoder::new(&mut body),
    )?;
    let id_value =
        HeaderValue::from_str(&identity.to_string()).map_err(|e| ProtocolError::HttpError(e.to_string()))?;

    info!(%identity, resumed = hello.logged_in, "HTTP connection established");
    let mut response = reply_with(body.freeze());
    response
        .headers_mut()
        .insert(HeaderName::from_static(CONNECTION_ID_HEADER), id_value);
    Ok(response)
}

async fn exchange(
    manager: &ConnectionManager,
    settings: &HttpSettings,
    identity: Identifier,
    body: Bytes,
) -> Result<HttpResponse> {
    if manager.connection(&identity).is_none() {
        return Ok(reply(StatusCode::NOT_FOUND));
    }
    let frames = match split_frames(body, settings.max_frame_size) {
        Ok(frames) => frames,
        Err(error) => {
            debug!(%identity, %error, "Malformed request body");
            return Ok(reply(StatusCode::BAD_REQUEST));
        }
    };

    let (responder, answer) = PollResponder::new();
    let channel = Channel::Request(responder);
    for frame in &frames {
        if let Err(error) = manager.receive_frame(&channel, identity, frame).await {
            debug!(%identity, %error, "Rejecting request");
            let status = if matches!(error, ProtocolError::NoSuchConnection(_)) {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::BAD_REQUEST
            };
            return Ok(reply(status));
        }
    }

    let Channel::Request(responder) = &channel else {
        return Ok(reply(StatusCode::NO_CONTENT));
    };
    if responder.claim().is_some() {
        // no poll in this request
        return Ok(reply(StatusCode::NO_CONTENT));
    }
    match timeout(settings.poll_timeout, answer).await {
        Ok(Ok(frames)) => Ok(reply_with(frames)),
        // poll expired, superseded or the connection closed
        Ok(Err(_)) | Err(_) => Ok(reply(StatusCode::NO_CONTENT)),
    }
}

/// Answer one request. An `Err` aborts the physical connection without a
/// response.
async fn respond(
    manager: Arc<ConnectionManager>,
    settings: Arc<HttpSettings>,
    request: Request<Incoming>,
) -> Result<HttpResponse> {
    if request.method() != Method::POST {
        return Ok(reply(StatusCode::METHOD_NOT_ALLOWED));
    }
    let identity = match request.headers().get(CONNECTION_ID_HEADER) {
        None => None,
        Some(value) => match value.to_str().ok().and_then(|v| v.parse::<Identifier>().ok()) {
            Some(identity) => Some(identity),
            None => return Ok(reply(StatusCode::BAD_REQUEST)),
        },
    };

    let body = match Limited::new(request.into_body(), settings.max_content_length).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) if error.is::<LengthLimitError>() => return Ok(reply(StatusCode::PAYLOAD_TOO_LARGE)),
        Err(error) => {
            debug!(%error, "Request body unreadable");
            return Ok(reply(StatusCode::BAD_REQUEST));
        }
    };

    match identity {
        None => handshake(&manager, &settings, &body),
        Some(identity) => exchange(&manager, &settings, identity, body).await,
    }
}

/// Serve HTTP/1.1 requests on a classified physical connection until the
/// peer closes it. A handshake with a bad magic header closes the socket
/// without a response.
#[instrument(level = "debug", skip_all)]
pub async fn serve_http(manager: Arc<ConnectionManager>, io: BoxedIo, settings: HttpSettings) -> Result<()> {
    let settings = Arc::new(settings);
    let service = service_fn(move |request| respond(Arc::clone(&manager), Arc::clone(&settings), request));

    http1::Builder::new()
        .timer(TokioTimer::new())
        .serve_connection(TokioIo::new(io), service)
        .await
        .map_err(|error| ProtocolError::HttpError(error.to_string()))
}
