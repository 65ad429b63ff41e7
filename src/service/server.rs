//! # Server
//!
//! Accepts physical connections on every configured port, classifies them
//! through the negotiation pipeline and hands them to the matching transport.
//!
//! ```text
//! accept ─▶ find_negotiators(port) ─▶ negotiate ─▶ accept_transport?
//!                                                    ├─ RawStreaming ─▶ tcp::serve_connection
//!                                                    ├─ Http1        ─▶ http::serve_http
//!                                                    └─ WebSocket    ─▶ websocket::serve_websocket
//! ```

use crate::config::NetworkConfig;
use crate::connection::ConnectionManager;
use crate::error::{
    constants::{ERR_NO_NEGOTIATORS, ERR_UNCLASSIFIED},
    ProtocolError, Result,
};
use crate::negotiation::{negotiate, Framing};
use crate::serialization::Protocol;
use crate::transport::http::{serve_http, HttpSettings};
use crate::transport::tcp::{serve_connection, StreamSettings};
use crate::transport::tls::TlsServerConfig;
use crate::transport::websocket::serve_websocket;
use crate::transport::{Transport, TransportLayer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, instrument, warn};

fn transport_for(framing: Framing) -> Transport {
    match framing {
        Framing::RawStreaming => Transport::Tcp,
        Framing::Http1 => Transport::Http,
        Framing::Http2 => Transport::Http2,
        Framing::WebSocket => Transport::WebSocket,
    }
}

pub struct Server {
    config: NetworkConfig,
    manager: Arc<ConnectionManager>,
    tls: Option<TlsAcceptor>,
    active: Arc<AtomicUsize>,
}

impl Server {
    /// Validate `config` and load TLS material if TLS is enabled.
    pub fn new(config: NetworkConfig, protocol: Arc<Protocol>) -> Result<Self> {
        config.validate_strict()?;

        let tls = if config.server.tls.enabled {
            let transports: Vec<Transport> = config.server.transports.iter().map(|b| b.transport).collect();
            Some(TlsServerConfig::from_config(&config.server.tls, &transports)?.acceptor()?)
        } else {
            None
        };

        Ok(Self {
            manager: Arc::new(ConnectionManager::new(&config.server, protocol)),
            config,
            tls,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Physical connections currently being served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Bind every configured port and serve until CTRL+C.
    pub async fn start(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.start_with_shutdown(shutdown_rx).await
    }

    /// Bind every configured port and serve until `shutdown_rx` fires, then
    /// wait for connections to drain and close whatever is left.
    #[instrument(skip_all, fields(bind = %self.config.server.bind_address))]
    pub async fn start_with_shutdown(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let server = Arc::new(self);
        let (stop_tx, stop_rx) = watch::channel(false);

        for port in server.config.server.ports() {
            let addr = format!("{}:{port}", server.config.server.bind_address);
            let listener = TcpListener::bind(&addr).await?;
            info!(address = %addr, "Listening");
            tokio::spawn(Arc::clone(&server).serve(listener, stop_rx.clone()));
        }

        let _ = shutdown_rx.recv().await;
        info!("Shutting down server. Waiting for connections to close...");
        let _ = stop_tx.send(true);

        let deadline = tokio::time::sleep(server.config.server.shutdown_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!("Shutdown timeout reached, closing remaining connections");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    let connections = server.active_connections();
                    if connections == 0 {
                        info!("All connections closed, shutting down");
                        break;
                    }
                    debug!(connections, "Waiting for connections to close");
                }
            }
        }

        server.manager.close_all().await;
        Ok(())
    }

    /// Accept on `listener` until `stop` flips to `true`.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut stop: watch::Receiver<bool>) -> Result<()> {
        let port = listener.local_addr()?.port();
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    debug!(port, "Listener stopped");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let server = Arc::clone(&self);
                        server.active.fetch_add(1, Ordering::AcqRel);
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_socket(socket, peer, port).await {
                                debug!(%peer, error = %e, "Connection ended");
                            }
                            server.active.fetch_sub(1, Ordering::AcqRel);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }

    #[instrument(skip_all, fields(peer = %peer, port = port))]
    async fn handle_socket(&self, socket: TcpStream, peer: SocketAddr, port: u16) -> Result<()> {
        socket.set_nodelay(true)?;
        let server = &self.config.server;

        let negotiators = self.manager.find_negotiators(TransportLayer::Tcp, port);
        if negotiators.is_empty() {
            return Err(ProtocolError::NegotiationFailed(ERR_NO_NEGOTIATORS.to_string()));
        }

        let negotiated = timeout(
            server.negotiation_timeout,
            negotiate(Box::new(socket), &negotiators, self.tls.as_ref(), server.negotiation_window),
        )
        .await
        .map_err(|_| ProtocolError::Timeout)??;

        let resolution = negotiated.resolution;
        let transport = transport_for(resolution.framing);
        if !self.manager.accept_transport(transport, port) {
            warn!(%transport, port, "Transport not accepted on this port");
            return Err(ProtocolError::NegotiationFailed(ERR_UNCLASSIFIED.to_string()));
        }

        let manager = Arc::clone(&self.manager);
        match transport {
            Transport::Tcp => {
                let settings = StreamSettings::new(&self.config.codec, server.negotiation_timeout);
                serve_connection(manager, negotiated.io, transport, resolution.compression, settings).await
            }
            Transport::Http => {
                let settings = HttpSettings::new(server, self.config.codec.max_frame_size, self.config.codec.buffer_pool_size);
                serve_http(manager, negotiated.io, settings).await
            }
            Transport::WebSocket => {
                if let Some(kind) = resolution.compression {
                    return Err(ProtocolError::NegotiationFailed(format!(
                        "{} compression is not carried over WebSocket",
                        kind.name()
                    )));
                }
                let settings = StreamSettings::new(&self.config.codec, server.negotiation_timeout);
                serve_websocket(manager, negotiated.io, settings).await
            }
            Transport::Http2 => {
                warn!(%transport, "Recognised transport has no connection handler");
                Err(ProtocolError::Unsupported(format!("{transport} connections")))
            }
        }
    }
}
