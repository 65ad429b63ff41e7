//! Client entry points over the raw streaming transport.

use crate::config::NetworkConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::protocol::message::Identifier;
use crate::serialization::Protocol;
use crate::transport::tcp;
use std::sync::Arc;

/// Connect with a fresh identity.
pub async fn connect(config: &NetworkConfig, protocol: Arc<Protocol>) -> Result<Arc<Connection>> {
    tcp::connect(&config.client, &config.codec, protocol, None).await
}

/// Connect again as `identity`, which the server keeps if it is free.
pub async fn resume(config: &NetworkConfig, protocol: Arc<Protocol>, identity: Identifier) -> Result<Arc<Connection>> {
    tcp::connect(&config.client, &config.codec, protocol, Some(identity)).await
}
