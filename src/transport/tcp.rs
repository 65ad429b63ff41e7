//! # Streaming Transport
//!
//! Raw streaming connections: handshake opening, then length-prefixed frames
//! in both directions over one socket.
//!
//! Each connection gets a writer task that owns the sink half of the framed
//! stream. Writes are handed to it through a bounded queue and acknowledged
//! once the codec flushed them, so the futures returned by the context
//! resolve after the bytes reached the socket.

use crate::config::{ClientConfig, CodecConfig};
use crate::connection::context::{message_frame, raw_frame, ConnectionContext, WriteFuture};
use crate::connection::{Channel, Connection, ConnectionManager};
use crate::core::buffer::{Decoder, Encoder};
use crate::core::codec::{CodecRole, Inbound, Outbound, WireCodec};
use crate::error::{
    constants::{ERR_HANDSHAKE_EXPECTED, ERR_HANDSHAKE_RESPONSE, ERR_WRITER_GONE},
    ProtocolError, Result,
};
use crate::negotiation::BoxedIo;
use crate::protocol::handshake::{
    decode_handshake_response, encode_handshake_response, HandshakeRequest, HandshakeResponse,
};
use crate::protocol::message::{Identifier, Message};
use crate::serialization::{Protocol, Value};
use crate::transport::Transport;
use crate::utils::buffer_pool::BufferPool;
use crate::utils::compression::CompressionKind;
use bytes::{Bytes, BytesMut};
use futures::future::{self, FutureExt};
use futures::stream::SplitSink;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

type FramedIo = Framed<BoxedIo, WireCodec>;

/// Writes queued per connection before writers wait
const WRITE_QUEUE_DEPTH: usize = 64;

/// Limits shared by every streaming connection.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub max_frame_size: usize,
    pub buffer_pool_size: usize,
    pub handshake_timeout: Duration,
}

impl StreamSettings {
    pub fn new(codec: &CodecConfig, handshake_timeout: Duration) -> Self {
        Self {
            max_frame_size: codec.max_frame_size,
            buffer_pool_size: codec.buffer_pool_size,
            handshake_timeout,
        }
    }
}

enum Command {
    Write(Bytes, oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<Result<()>>),
}

/// Context for one streaming socket.
pub struct StreamConnectionContext {
    transport: Transport,
    protocol: Arc<Protocol>,
    pool: BufferPool,
    commands: mpsc::Sender<Command>,
    closed: AtomicBool,
}

impl StreamConnectionContext {
    /// Spawn the writer task for `sink`, which takes one frame per item.
    /// `first` is written before anything queued through the context. The
    /// returned receiver flips to `true` once the writer has shut the sink down.
    pub(crate) fn spawn<S>(
        transport: Transport,
        protocol: Arc<Protocol>,
        settings: &StreamSettings,
        sink: S,
        first: Option<Bytes>,
    ) -> (Arc<Self>, watch::Receiver<bool>)
    where
        S: Sink<Bytes, Error = ProtocolError> + Unpin + Send + 'static,
    {
        let (commands, queue) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let (released, released_rx) = watch::channel(false);
        tokio::spawn(run_writer(sink, queue, first, released));

        let context = Arc::new(Self {
            transport,
            protocol,
            pool: BufferPool::new(settings.buffer_pool_size),
            commands,
            closed: AtomicBool::new(false),
        });
        (context, released_rx)
    }

    fn enqueue(&self, frame: Result<Bytes>) -> WriteFuture {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        if self.is_closed() {
            return future::ready(Err(ProtocolError::ConnectionClosed)).boxed();
        }
        let commands = self.commands.clone();
        async move {
            let (ack, done) = oneshot::channel();
            commands
                .send(Command::Write(frame, ack))
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
            done.await
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, ERR_WRITER_GONE))?
        }
        .boxed()
    }
}

/// Sink half of a framed socket, taking frames as units.
fn unit_sink(sink: SplitSink<FramedIo, Outbound>) -> impl Sink<Bytes, Error = ProtocolError> + Unpin + Send + 'static {
    sink.with(|frame: Bytes| future::ready(Ok::<_, ProtocolError>(Outbound::Unit(frame))))
}

async fn run_writer<S>(mut sink: S, mut queue: mpsc::Receiver<Command>, first: Option<Bytes>, released: watch::Sender<bool>)
where
    S: Sink<Bytes, Error = ProtocolError> + Unpin,
{
    if let Some(first) = first {
        if let Err(error) = sink.send(first).await {
            debug!(%error, "Initial write failed");
            queue.close();
        }
    }

    while let Some(command) = queue.recv().await {
        match command {
            Command::Write(frame, ack) => {
                let result = sink.send(frame).await;
                let failed = result.is_err();
                let _ = ack.send(result);
                if failed {
                    queue.close();
                }
            }
            Command::Close(ack) => {
                let _ = ack.send(sink.close().await);
                let _ = released.send(true);
                return;
            }
        }
    }

    // every context handle is gone or the socket failed
    let _ = sink.close().await;
    let _ = released.send(true);
}

impl ConnectionContext for StreamConnectionContext {
    fn transport(&self) -> Transport {
        self.transport
    }

    fn write_message(&self, message: Message) -> WriteFuture {
        self.enqueue(message_frame(&self.protocol, &self.pool, &message))
    }

    fn write_raw(&self, payload: Bytes, metadata: Option<Arc<dyn Value>>) -> WriteFuture {
        self.enqueue(raw_frame(&self.protocol, &self.pool, &payload, metadata.as_deref()))
    }

    fn close(&self) -> WriteFuture {
        if self.closed.swap(true, Ordering::AcqRel) {
            return future::ready(Ok(())).boxed();
        }
        let commands = self.commands.clone();
        async move {
            let (ack, done) = oneshot::channel();
            if commands.send(Command::Close(ack)).await.is_err() {
                // writer already stopped and released the socket
                return Ok(());
            }
            done.await.unwrap_or(Ok(()))
        }
        .boxed()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Feed inbound units to `manager` until the peer leaves, a frame fails to
/// decode or the connection is closed locally.
pub(crate) async fn read_frames<St>(
    manager: Arc<ConnectionManager>,
    connection: Arc<Connection>,
    mut stream: St,
    mut released: watch::Receiver<bool>,
) where
    St: Stream<Item = Result<Inbound>> + Unpin,
{
    let identity = connection.identity();
    loop {
        let item = tokio::select! {
            _ = released.changed() => break,
            item = stream.next() => item,
        };
        match item {
            Some(Ok(Inbound::Unit(frame))) => {
                if let Err(error) = manager.receive_frame(&Channel::Stream, identity, &frame).await {
                    debug!(%identity, %error, "Stopping reader");
                    break;
                }
            }
            Some(Ok(Inbound::Hello(_))) => {
                let error = ProtocolError::HandshakeError(ERR_HANDSHAKE_EXPECTED.to_string());
                manager.exceptionally(identity, &error);
                break;
            }
            Some(Err(error)) => {
                warn!(%identity, %error, "Stream failed");
                manager.exceptionally(identity, &error);
                break;
            }
            None => {
                debug!(%identity, "Peer closed stream");
                break;
            }
        }
    }
    if let Err(error) = connection.close().await {
        debug!(%identity, %error, "Close failed");
    }
}

pub(crate) fn encode_response(protocol: &Protocol, identity: Identifier) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_handshake_response(
        protocol,
        &HandshakeResponse {
            connection_id: identity,
        },
        &mut Encoder::new(&mut buf),
    )?;
    Ok(buf.freeze())
}

/// Accept a classified streaming connection: read the handshake, register
/// the connection, answer with its identity and serve frames until it ends.
///
/// A bad magic header ends the connection before anything is decoded or
/// written back.
#[instrument(level = "debug", skip_all, fields(transport = %transport))]
pub async fn serve_connection(
    manager: Arc<ConnectionManager>,
    io: BoxedIo,
    transport: Transport,
    compression: Option<CompressionKind>,
    settings: StreamSettings,
) -> Result<()> {
    let protocol = Arc::clone(manager.protocol());
    let codec = WireCodec::new(Arc::clone(&protocol), CodecRole::Acceptor, settings.max_frame_size)
        .with_compression(compression);
    let mut framed = Framed::new(io, codec);

    let hello = match timeout(settings.handshake_timeout, framed.next()).await {
        Err(_) => return Err(ProtocolError::Timeout),
        Ok(None) => return Err(ProtocolError::ConnectionClosed),
        Ok(Some(Err(error))) => return Err(error),
        Ok(Some(Ok(Inbound::Unit(_)))) => {
            return Err(ProtocolError::HandshakeError(ERR_HANDSHAKE_EXPECTED.to_string()))
        }
        Ok(Some(Ok(Inbound::Hello(hello)))) => hello,
    };

    let identity = hello.assign_identity();
    if manager.connection(&identity).is_some() {
        return Err(ProtocolError::HandshakeError(format!("identity {identity} already connected")));
    }

    let response = encode_response(&protocol, identity)?;
    let (sink, stream) = framed.split();
    let (context, released) =
        StreamConnectionContext::spawn(transport, protocol, &settings, unit_sink(sink), Some(response));
    let shared: Arc<dyn ConnectionContext> = context;

    let connection = manager.assign_connection(identity, Arc::clone(&shared), transport)?;
    if !connection.uses_context(&shared) {
        if let Err(error) = shared.close().await {
            debug!(%identity, %error, "Close failed");
        }
        return Err(ProtocolError::HandshakeError(format!("identity {identity} already connected")));
    }

    info!(%identity, resumed = hello.logged_in, "Streaming connection established");
    read_frames(manager, connection, stream, released).await;
    Ok(())
}

/// Open a raw streaming connection to `config.address`. Pass the identity
/// of an earlier session as `resume` to ask the server to keep it.
///
/// Frames arriving from the server are dispatched to the returned
/// connection's listeners.
#[instrument(skip(config, protocol, codec), fields(address = %config.address))]
pub async fn connect(
    config: &ClientConfig,
    codec: &CodecConfig,
    protocol: Arc<Protocol>,
    resume: Option<Identifier>,
) -> Result<Arc<Connection>> {
    let socket = timeout(config.connection_timeout, TcpStream::connect(config.address.as_str()))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    socket.set_nodelay(true)?;

    let settings = StreamSettings::new(codec, config.handshake_timeout);
    let io: BoxedIo = Box::new(socket);
    let mut framed = Framed::new(
        io,
        WireCodec::new(Arc::clone(&protocol), CodecRole::Initiator, settings.max_frame_size),
    );

    framed
        .send(Outbound::Hello {
            logged_in: resume.is_some(),
            request: HandshakeRequest { connection_id: resume },
        })
        .await?;

    let identity = match timeout(config.handshake_timeout, framed.next()).await {
        Err(_) => return Err(ProtocolError::Timeout),
        Ok(Some(Ok(Inbound::Unit(unit)))) => decode_handshake_response(&protocol, &mut Decoder::new(&unit))?.connection_id,
        Ok(Some(Err(error))) => return Err(error),
        Ok(_) => return Err(ProtocolError::HandshakeError(ERR_HANDSHAKE_RESPONSE.to_string())),
    };

    let manager = Arc::new(ConnectionManager::detached(Arc::clone(&protocol)));
    let (sink, stream) = framed.split();
    let (context, released) = StreamConnectionContext::spawn(Transport::Tcp, protocol, &settings, unit_sink(sink), None);
    let connection = manager.assign_connection(identity, context, Transport::Tcp)?;
    tokio::spawn(read_frames(manager, Arc::clone(&connection), stream, released));

    info!(%identity, "Connected");
    Ok(connection)
}
