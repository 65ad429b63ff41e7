//! # Transports
//!
//! Descriptors of the ways a logical connection can travel, and the
//! per-transport connection contexts that frame messages onto them.
//!
//! ## Components
//! - **Tcp**: raw streaming socket, magic header + length-prefixed frames
//! - **Http**: HTTP/1.1 long polling, frames delivered in poll responses
//! - **WebSocket**: one frame per binary message after an HTTP/1.1 upgrade
//! - **Http2**: recognised during negotiation, never served
//! - **Tls**: rustls server configuration with ALPN derived from transports
//! - **Prefixed**: replays bytes consumed while sniffing a new connection

pub mod http;
pub mod prefixed;
pub mod tcp;
pub mod tls;
pub mod websocket;

use crate::negotiation::{Negotiator, HTTP_NEGOTIATOR, MAGIC_NEGOTIATOR, WEBSOCKET_NEGOTIATOR};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TRANSPORT_NAME_TCP: &str = "wirelink::transport::tcp";
pub const TRANSPORT_NAME_HTTP: &str = "wirelink::transport::http";
pub const TRANSPORT_NAME_HTTP2: &str = "wirelink::transport::http2";
pub const TRANSPORT_NAME_WEBSOCKET: &str = "wirelink::transport::websocket-binary";
pub const TRANSPORT_NAME_UDP: &str = "wirelink::transport::udp";
pub const TRANSPORT_NAME_UDT: &str = "wirelink::transport::udt";
pub const TRANSPORT_NAME_RDP: &str = "wirelink::transport::rdp";

pub const DEFAULT_PORT_TCP: u16 = 8080;
pub const DEFAULT_PORT_UDP: u16 = 9090;

/// Request path that upgrades an HTTP connection to WebSocket
pub const WEBSOCKET_RELATIVE_PATH: &str = "/wss";

/// Network layer a transport runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportLayer {
    Tcp,
    Udp,
}

impl TransportLayer {
    /// Whether TLS can be layered on this transport layer
    pub fn ssl_capable(&self) -> bool {
        matches!(self, TransportLayer::Tcp)
    }

    pub fn default_port(&self) -> u16 {
        match self {
            TransportLayer::Tcp => DEFAULT_PORT_TCP,
            TransportLayer::Udp => DEFAULT_PORT_UDP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Http,
    Http2,
    WebSocket,
}

impl Transport {
    pub const ALL: [Transport; 4] = [Transport::Tcp, Transport::Http, Transport::Http2, Transport::WebSocket];

    /// Identification string used in configuration and capability negotiation
    pub fn name(&self) -> &'static str {
        match self {
            Transport::Tcp => TRANSPORT_NAME_TCP,
            Transport::Http => TRANSPORT_NAME_HTTP,
            Transport::Http2 => TRANSPORT_NAME_HTTP2,
            Transport::WebSocket => TRANSPORT_NAME_WEBSOCKET,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Streaming transports push frames as they are written; the others hold
    /// them until the peer polls.
    pub fn is_streaming(&self) -> bool {
        !matches!(self, Transport::Http)
    }

    pub fn default_port(&self) -> u16 {
        self.transport_layer().default_port()
    }

    pub fn transport_layer(&self) -> TransportLayer {
        TransportLayer::Tcp
    }

    /// Negotiators that recognise this transport on a shared port. A
    /// WebSocket connection starts as an HTTP/1.1 request, so it needs both.
    pub fn negotiators(&self) -> Vec<&'static dyn Negotiator> {
        match self {
            Transport::Tcp => vec![&MAGIC_NEGOTIATOR],
            Transport::Http | Transport::Http2 => vec![&HTTP_NEGOTIATOR],
            Transport::WebSocket => vec![&HTTP_NEGOTIATOR, &WEBSOCKET_NEGOTIATOR],
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
