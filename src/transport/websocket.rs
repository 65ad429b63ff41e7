//! # WebSocket Transport
//!
//! Streaming connections upgraded from HTTP/1.1 on the WebSocket path. Each
//! binary message carries one unit and needs no length prefix:
//!
//! ```text
//! first message (client → server) : [MAGIC_HEADER][logged in][HandshakeRequest]
//! first message (server → client) : HandshakeResponse
//! every later message             : [frame]
//! ```
//!
//! Writes go through the same queued writer as raw streaming sockets.

use crate::config::MAGIC_HEADER;
use crate::connection::{ConnectionContext, ConnectionManager};
use crate::core::buffer::Decoder;
use crate::core::codec::Inbound;
use crate::error::{ProtocolError, Result};
use crate::negotiation::BoxedIo;
use crate::protocol::handshake::read_handshake;
use crate::transport::tcp::{encode_response, read_frames, StreamConnectionContext, StreamSettings};
use crate::transport::Transport;
use bytes::Bytes;
use futures::future;
use futures::stream::{BoxStream, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};
use tracing::{debug, info, instrument};

/// Binary payloads of `socket`. Control messages are left to tungstenite;
/// a text message is a protocol error.
fn binary_messages(socket: SplitStream<WebSocketStream<BoxedIo>>) -> BoxStream<'static, Result<Bytes>> {
    socket
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Binary(payload)) => Some(Ok(payload)),
                Ok(Message::Text(_)) => Some(Err(ProtocolError::UnexpectedValue {
                    expected: "binary message",
                    found: "text message",
                })),
                Ok(_) => None,
                Err(error) => Some(Err(ProtocolError::from(error))),
            })
        })
        .boxed()
}

fn socket_config(settings: &StreamSettings) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    // the opening is the largest message a peer may send
    config.max_message_size = Some(MAGIC_HEADER.len() + 1 + settings.max_frame_size);
    config.max_frame_size = Some(MAGIC_HEADER.len() + 1 + settings.max_frame_size);
    config
}

/// Accept a classified WebSocket connection: complete the upgrade, read the
/// opening message, register the connection and serve frames until it ends.
///
/// An opening with a bad magic header ends the connection without a reply.
#[instrument(level = "debug", skip_all)]
pub async fn serve_websocket(manager: Arc<ConnectionManager>, io: BoxedIo, settings: StreamSettings) -> Result<()> {
    let protocol = Arc::clone(manager.protocol());
    let socket = timeout(
        settings.handshake_timeout,
        accept_async_with_config(io, Some(socket_config(&settings))),
    )
    .await
    .map_err(|_| ProtocolError::Timeout)??;
    debug!("WebSocket upgrade complete");

    let (sink, stream) = socket.split();
    let mut messages = binary_messages(stream);

    let opening = match timeout(settings.handshake_timeout, messages.next()).await {
        Err(_) => return Err(ProtocolError::Timeout),
        Ok(None) => return Err(ProtocolError::ConnectionClosed),
        Ok(Some(result)) => result?,
    };
    let hello = read_handshake(&protocol, &mut Decoder::new(&opening))?;

    let identity = hello.assign_identity();
    if manager.connection(&identity).is_some() {
        return Err(ProtocolError::HandshakeError(format!("identity {identity} already connected")));
    }

    let response = encode_response(&protocol, identity)?;
    let sink = sink
        .sink_map_err(ProtocolError::from)
        .with(|frame: Bytes| future::ready(Ok::<_, ProtocolError>(Message::Binary(frame))));
    let (context, released) =
        StreamConnectionContext::spawn(Transport::WebSocket, protocol, &settings, sink, Some(response));
    let shared: Arc<dyn ConnectionContext> = context;

    let connection = manager.assign_connection(identity, Arc::clone(&shared), Transport::WebSocket)?;
    if !connection.uses_context(&shared) {
        if let Err(error) = shared.close().await {
            debug!(%identity, %error, "Close failed");
        }
        return Err(ProtocolError::HandshakeError(format!("identity {identity} already connected")));
    }

    info!(%identity, resumed = hello.logged_in, "WebSocket connection established");
    read_frames(manager, connection, messages.map(|frame| frame.map(Inbound::Unit)), released).await;
    Ok(())
}
