//! # Connection Manager
//!
//! Registry of live connections keyed by identity. Routes decoded frames to
//! the right [`Connection`], fans connect and disconnect events out to
//! listeners and decides which negotiators apply to a new physical connection.

use super::{push, snapshot, Channel, Connection, ConnectionContext};
use crate::config::{ServerConfig, TransportBinding};
use crate::core::buffer::Decoder;
use crate::core::frame::{decode_frame, Frame};
use crate::error::{ProtocolError, Result};
use crate::negotiation::{Negotiator, GZIP_NEGOTIATOR, SNAPPY_NEGOTIATOR, TLS_NEGOTIATOR};
use crate::protocol::message::{Identifier, Message, PollingRequest};
use crate::serialization::{Protocol, Value};
use crate::transport::{Transport, TransportLayer};
use bytes::Bytes;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, info, instrument, warn};

pub type ConnectionListener = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

#[derive(Default)]
struct Registry {
    connections: RwLock<HashMap<Identifier, Arc<Connection>>>,
    connected: RwLock<Vec<ConnectionListener>>,
    disconnected: RwLock<Vec<ConnectionListener>>,
}

impl Registry {
    /// Drop `connection` if it is still the one registered under its identity.
    fn release(&self, connection: &Connection) {
        let removed = {
            let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
            match connections.get(&connection.identity()) {
                Some(current) if std::ptr::eq(Arc::as_ptr(current), connection) => {
                    connections.remove(&connection.identity())
                }
                _ => None,
            }
        };
        if let Some(connection) = removed {
            debug!(identity = %connection.identity(), "Connection removed");
            for listener in snapshot(&self.disconnected) {
                listener(&connection);
            }
        }
    }
}

pub struct ConnectionManager {
    bindings: Vec<TransportBinding>,
    tls_enabled: bool,
    gzip_enabled: bool,
    snappy_enabled: bool,
    protocol: Arc<Protocol>,
    registry: Arc<Registry>,
}

impl ConnectionManager {
    pub fn new(config: &ServerConfig, protocol: Arc<Protocol>) -> Self {
        Self {
            bindings: config.transports.clone(),
            tls_enabled: config.tls.enabled,
            gzip_enabled: config.gzip_enabled,
            snappy_enabled: config.snappy_enabled,
            protocol,
            registry: Arc::new(Registry::default()),
        }
    }

    /// Manager with no transports bound, for the client side of a connection.
    pub fn detached(protocol: Arc<Protocol>) -> Self {
        Self {
            bindings: Vec::new(),
            tls_enabled: false,
            gzip_enabled: false,
            snappy_enabled: false,
            protocol,
            registry: Arc::new(Registry::default()),
        }
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    /// Whether `transport` is enabled and bound to exactly `port`.
    pub fn accept_transport(&self, transport: Transport, port: u16) -> bool {
        self.bindings
            .iter()
            .any(|binding| binding.transport == transport && binding.port == port)
    }

    /// Negotiators for a physical connection on `port`: each matching
    /// transport's own detector, then TLS, GZip and Snappy when enabled.
    pub fn find_negotiators(&self, layer: TransportLayer, port: u16) -> Vec<&'static dyn Negotiator> {
        let matching: Vec<Transport> = self
            .bindings
            .iter()
            .filter(|binding| binding.port == port && binding.transport.transport_layer() == layer)
            .map(|binding| binding.transport)
            .collect();

        let mut negotiators: Vec<&'static dyn Negotiator> = Vec::new();
        for negotiator in matching.iter().flat_map(Transport::negotiators) {
            if !negotiators.iter().any(|n| n.name() == negotiator.name()) {
                negotiators.push(negotiator);
            }
        }
        if matching.is_empty() {
            return negotiators;
        }

        if self.tls_enabled && matching.iter().any(|t| t.transport_layer().ssl_capable()) {
            negotiators.push(&TLS_NEGOTIATOR);
        }
        if self.gzip_enabled {
            negotiators.push(&GZIP_NEGOTIATOR);
        }
        if self.snappy_enabled {
            negotiators.push(&SNAPPY_NEGOTIATOR);
        }
        negotiators
    }

    /// Register `identity`, or return the connection already registered for
    /// it. Connect listeners run once, for the caller that created it.
    #[instrument(level = "debug", skip_all, fields(identity = %identity, transport = %transport))]
    pub fn assign_connection(
        &self,
        identity: Identifier,
        context: Arc<dyn ConnectionContext>,
        transport: Transport,
    ) -> Result<Arc<Connection>> {
        let (connection, created) = {
            let mut connections = self.registry.connections.write()?;
            match connections.entry(identity) {
                Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
                Entry::Vacant(entry) => {
                    let connection = Arc::new(Connection::new(identity, transport, context));
                    let registry: Weak<Registry> = Arc::downgrade(&self.registry);
                    connection.add_close_listener(move |closed| {
                        if let Some(registry) = registry.upgrade() {
                            registry.release(closed);
                        }
                    });
                    entry.insert(Arc::clone(&connection));
                    (connection, true)
                }
            }
        };

        if created {
            info!("Connection registered");
            for listener in snapshot(&self.registry.connected) {
                listener(&connection);
            }
        }
        Ok(connection)
    }

    pub fn connection(&self, identity: &Identifier) -> Option<Arc<Connection>> {
        self.registry
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.registry
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn register_connected_listener<F>(&self, listener: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        push(&self.registry.connected, Arc::new(listener) as ConnectionListener);
    }

    pub fn register_disconnected_listener<F>(&self, listener: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        push(&self.registry.disconnected, Arc::new(listener) as ConnectionListener);
    }

    /// Deliver a decoded message. Polls on request/response transports go to
    /// the context instead of the message listeners.
    ///
    /// # Errors
    /// Returns `ProtocolError::NoSuchConnection` if `identity` is not registered
    pub fn publish_message(&self, channel: &Channel, identity: Identifier, message: Message) -> Result<()> {
        let connection = self
            .connection(&identity)
            .ok_or(ProtocolError::NoSuchConnection(identity))?;

        if !connection.transport().is_streaming() && message.body_as::<PollingRequest>().is_some() {
            return connection.context().process_polling_request(channel, &message);
        }
        connection.notify_message(&message);
        Ok(())
    }

    pub fn publish_raw(&self, identity: Identifier, metadata: Option<&dyn Value>, payload: &Bytes) -> Result<()> {
        let connection = self
            .connection(&identity)
            .ok_or(ProtocolError::NoSuchConnection(identity))?;
        connection.notify_raw(metadata, payload);
        Ok(())
    }

    /// Report `error` to the connection's exception listeners if it is still
    /// registered; otherwise only log it.
    pub fn exceptionally(&self, identity: Identifier, error: &ProtocolError) {
        match self.connection(&identity) {
            Some(connection) => connection.notify_exception(error),
            None => debug!(%identity, %error, "Dropping error for unknown connection"),
        }
    }

    /// Decode and dispatch one inbound frame. A frame that fails to decode
    /// closes the connection after its exception listeners have seen the error.
    pub async fn receive_frame(&self, channel: &Channel, identity: Identifier, frame: &[u8]) -> Result<()> {
        let mut decoder = Decoder::new(frame);
        match decode_frame(&self.protocol, &mut decoder) {
            Ok(Frame::Message(message)) => self.publish_message(channel, identity, message),
            Ok(Frame::Raw { metadata, payload }) => self.publish_raw(identity, metadata.as_deref(), &payload),
            Err(error) => {
                warn!(%identity, %error, "Closing connection after undecodable frame");
                self.exceptionally(identity, &error);
                if let Some(connection) = self.connection(&identity) {
                    if let Err(error) = connection.close().await {
                        debug!(%identity, %error, "Close failed after undecodable frame");
                    }
                }
                Err(error)
            }
        }
    }

    /// Close every registered connection.
    pub async fn close_all(&self) {
        let connections: Vec<Arc<Connection>> = self
            .registry
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for connection in connections {
            if let Err(error) = connection.close().await {
                debug!(identity = %connection.identity(), %error, "Close failed during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::RecordingContext;
    use crate::core::buffer::Encoder;
    use crate::core::frame::encode_message_frame;
    use crate::connection::WriteFuture;
    use bytes::{Bytes, BytesMut};
    use futures::future::{self, FutureExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(config: ServerConfig) -> ConnectionManager {
        ConnectionManager::new(&config, Arc::new(Protocol::builder().build().unwrap()))
    }

    fn names(negotiators: &[&'static dyn Negotiator]) -> Vec<&'static str> {
        negotiators.iter().map(|n| n.name()).collect()
    }

    #[test]
    fn test_accept_transport_requires_exact_port() {
        let manager = manager(ServerConfig::default());
        assert!(manager.accept_transport(Transport::Tcp, 8080));
        assert!(!manager.accept_transport(Transport::Tcp, 8081));
        assert!(!manager.accept_transport(Transport::Http, 8080));
    }

    #[test]
    fn test_find_negotiators_order() {
        let mut config = ServerConfig::default();
        config.set_port(Transport::Http, 8080);
        config.set_port(Transport::Http2, 8080);
        config.set_port(Transport::WebSocket, 9000);
        config.tls.enabled = true;
        config.gzip_enabled = true;
        config.snappy_enabled = true;
        let manager = manager(config);

        assert_eq!(
            names(&manager.find_negotiators(TransportLayer::Tcp, 8080)),
            vec!["magic", "http", "tls", "gzip", "snappy"]
        );
        assert_eq!(
            names(&manager.find_negotiators(TransportLayer::Tcp, 9000)),
            vec!["http", "websocket", "tls", "gzip", "snappy"]
        );
        assert!(manager.find_negotiators(TransportLayer::Tcp, 1).is_empty());
        assert!(manager.find_negotiators(TransportLayer::Udp, 8080).is_empty());
    }

    #[test]
    fn test_tls_negotiator_only_when_enabled() {
        let manager = manager(ServerConfig::default());
        assert_eq!(names(&manager.find_negotiators(TransportLayer::Tcp, 8080)), vec!["magic"]);
    }

    #[test]
    fn test_unknown_identity_is_routing_error() {
        let manager = manager(ServerConfig::default());
        let id = Identifier::random();
        let err = manager.publish_message(&Channel::Stream, id, Message::new(1i32)).unwrap_err();
        assert!(matches!(err, ProtocolError::NoSuchConnection(missing) if missing == id));

        // swallowed
        manager.exceptionally(id, &ProtocolError::InvalidMagic);
    }

    #[test]
    fn test_polls_routed_to_context_on_request_transports() {
        let manager = manager(ServerConfig::default());
        let context = Arc::new(RecordingContext::on(Transport::Http));
        let id = Identifier::random();
        let connection = manager.assign_connection(id, context.clone(), Transport::Http).unwrap();

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        connection.add_message_listener(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.publish_message(&Channel::Stream, id, Message::new(PollingRequest)).unwrap();
        assert_eq!(context.polls.load(Ordering::SeqCst), 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 0);

        manager.publish_message(&Channel::Stream, id, Message::new(5i32)).unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_polls_are_messages_on_streaming_transports() {
        let manager = manager(ServerConfig::default());
        let context = Arc::new(RecordingContext::default());
        let id = Identifier::random();
        let connection = manager.assign_connection(id, context.clone(), Transport::Tcp).unwrap();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        connection.add_message_listener(move |_, message| {
            assert!(message.body_as::<PollingRequest>().is_some());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.publish_message(&Channel::Stream, id, Message::new(PollingRequest)).unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(context.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_unregisters_and_notifies_once() {
        let manager = manager(ServerConfig::default());
        let gone = Arc::new(AtomicUsize::new(0));
        let counter = gone.clone();
        manager.register_disconnected_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = Identifier::random();
        let connection = manager
            .assign_connection(id, Arc::new(RecordingContext::default()), Transport::Tcp)
            .unwrap();
        assert_eq!(manager.connection_count(), 1);

        connection.close().await.unwrap();
        connection.close().await.unwrap();
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(gone.load(Ordering::SeqCst), 1);

        // the identity can be assigned again once released
        let again = manager
            .assign_connection(id, Arc::new(RecordingContext::default()), Transport::Tcp)
            .unwrap();
        assert!(!Arc::ptr_eq(&again, &connection));
    }

    #[tokio::test]
    async fn test_receive_frame_dispatches_messages() {
        let manager = manager(ServerConfig::default());
        let id = Identifier::random();
        let connection = manager
            .assign_connection(id, Arc::new(RecordingContext::default()), Transport::Tcp)
            .unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        connection.add_message_listener(move |_, message| {
            assert_eq!(message.body_as::<String>().map(String::as_str), Some("hi"));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut buf = BytesMut::new();
        encode_message_frame(
            manager.protocol(),
            &Message::new(String::from("hi")),
            &mut Encoder::new(&mut buf),
        )
        .unwrap();
        manager.receive_frame(&Channel::Stream, id, &buf).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_tag_closes_with_one_exception() {
        let manager = manager(ServerConfig::default());
        let id = Identifier::random();
        let context = Arc::new(RecordingContext::default());
        let connection = manager.assign_connection(id, context.clone(), Transport::Tcp).unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        connection.add_exception_listener(move |_, error| {
            assert!(matches!(error, ProtocolError::InvalidFrameType(0x03)));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result = manager.receive_frame(&Channel::Stream, id, &[0x03, 0, 0]).await;
        assert!(matches!(result, Err(ProtocolError::InvalidFrameType(0x03))));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(connection.is_closed());
        assert_eq!(context.releases.load(Ordering::SeqCst), 1);
        assert!(manager.connection(&id).is_none());
    }

    /// Context whose release always fails.
    struct StuckContext;

    impl ConnectionContext for StuckContext {
        fn transport(&self) -> Transport {
            Transport::Tcp
        }

        fn write_message(&self, _: Message) -> WriteFuture {
            future::ready(Ok(())).boxed()
        }

        fn write_raw(&self, _: Bytes, _: Option<Arc<dyn Value>>) -> WriteFuture {
            future::ready(Ok(())).boxed()
        }

        fn close(&self) -> WriteFuture {
            future::ready(Err(ProtocolError::ConnectionClosed)).boxed()
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_failed_close_keeps_decode_error() {
        let manager = manager(ServerConfig::default());
        let id = Identifier::random();
        let connection = manager.assign_connection(id, Arc::new(StuckContext), Transport::Tcp).unwrap();

        // the release error is logged; the caller still sees why the frame failed
        let result = manager.receive_frame(&Channel::Stream, id, &[0x03]).await;
        assert!(matches!(result, Err(ProtocolError::InvalidFrameType(0x03))));
        assert!(connection.is_closed());
        assert!(manager.connection(&id).is_none());
    }
}
