//! # wirelink
//!
//! Message-oriented binary wire protocol with runtime transport negotiation.
//!
//! A server listens on one or more ports. Every accepted socket is sniffed by
//! a pipeline of negotiators (TLS, gzip/snappy, HTTP, WebSocket, raw magic)
//! and handed to the transport it was classified as. Whatever the transport,
//! the application sees logical [`Connection`]s identified by an
//! [`Identifier`] that exchange [`Message`]s and raw payloads encoded through
//! a [`Protocol`].
//!
//! ## Modules
//! - [`serialization`]: type and marshaller registries, the `Protocol` codec
//! - [`core`]: buffers, frame tags and the stream codec
//! - [`protocol`]: message model and connection handshake
//! - [`negotiation`]: first-bytes classification of physical connections
//! - [`connection`]: logical connections, contexts and the registry
//! - [`transport`]: raw streaming, HTTP long-poll and WebSocket transports, TLS
//! - [`service`]: server bootstrap and client entry points
//! - [`config`]: TOML/env configuration
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use wirelink::{NetworkConfig, Protocol, Server};
//!
//! # async fn run() -> wirelink::Result<()> {
//! let config = NetworkConfig::default();
//! wirelink::utils::init_logging(&config.logging)?;
//!
//! let protocol = Arc::new(Protocol::builder().build()?);
//! let server = Server::new(config, protocol)?;
//! server.connection_manager().register_connected_listener(|connection| {
//!     connection.add_message_listener(|connection, message| {
//!         tracing::info!(from = %connection.identity(), id = %message.identifier(), "Message received");
//!     });
//! });
//! server.start().await
//! # }
//! ```

#![warn(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod connection;
pub mod core;
pub mod error;
pub mod negotiation;
pub mod protocol;
pub mod serialization;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::NetworkConfig;
pub use connection::{Connection, ConnectionContext, ConnectionManager};
pub use error::{ProtocolError, Result};
pub use protocol::message::{Identifier, Message, MessageType};
pub use serialization::{Protocol, Value};
pub use service::Server;
pub use transport::Transport;
