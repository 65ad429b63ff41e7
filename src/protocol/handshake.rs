//! Connection handshake.
//!
//! The initiating side opens every physical connection with
//!
//! ```text
//! [MAGIC_HEADER (4)] [logged in: bool] [HandshakeRequest, Protocol encoded]
//! ```
//!
//! The accepting side validates the magic bytes before anything else is
//! decoded, then answers with a [`HandshakeResponse`] carrying the connection
//! identity it assigned.

use crate::config::MAGIC_HEADER;
use crate::core::buffer::{Decoder, Encoder};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::Identifier;
use crate::serialization::{Protocol, Value};
use std::any::Any;
use tracing::{debug, instrument};

/// Sent by the initiator. Carries the previous identity when resuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandshakeRequest {
    pub connection_id: Option<Identifier>,
}

impl Value for HandshakeRequest {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Sent by the acceptor once the connection is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub connection_id: Identifier,
}

impl Value for HandshakeResponse {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Decoded opening of a physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHello {
    pub logged_in: bool,
    pub request: HandshakeRequest,
}

impl ClientHello {
    /// Identity the acceptor assigns: a logged-in peer naming its previous
    /// identity keeps it, everybody else gets a fresh one.
    pub fn assign_identity(&self) -> Identifier {
        match (self.logged_in, self.request.connection_id) {
            (true, Some(id)) => id,
            _ => Identifier::random(),
        }
    }
}

/// Compare the magic prefix of `buf` as far as it goes.
///
/// Returns `Ok(true)` once the full header is present and correct, `Ok(false)`
/// while a correct prefix is still incomplete, and `InvalidMagic` on the first
/// differing byte.
pub fn check_magic(buf: &[u8]) -> Result<bool> {
    let available = buf.len().min(MAGIC_HEADER.len());
    if buf[..available] != MAGIC_HEADER[..available] {
        return Err(ProtocolError::InvalidMagic);
    }
    Ok(available == MAGIC_HEADER.len())
}

pub fn write_handshake(
    protocol: &Protocol,
    logged_in: bool,
    request: &HandshakeRequest,
    encoder: &mut Encoder<'_>,
) -> Result<()> {
    encoder.write_bytes(&MAGIC_HEADER);
    encoder.write_bool(logged_in);
    protocol.encode(request, encoder)
}

/// Read the initiator's opening. The magic header is checked before the
/// handshake request is touched.
#[instrument(level = "trace", skip_all)]
pub fn read_handshake(protocol: &Protocol, decoder: &mut Decoder<'_>) -> Result<ClientHello> {
    let available = decoder.remaining().min(MAGIC_HEADER.len());
    if !check_magic(decoder.read_bytes(available)?)? {
        return Err(ProtocolError::Incomplete);
    }
    let logged_in = decoder.read_bool()?;
    let request = protocol.decode_as::<HandshakeRequest>(decoder)?;
    debug!(logged_in, resumed = request.connection_id.is_some(), "Read handshake");
    Ok(ClientHello { logged_in, request })
}

pub fn encode_handshake_response(
    protocol: &Protocol,
    response: &HandshakeResponse,
    encoder: &mut Encoder<'_>,
) -> Result<()> {
    protocol.encode(response, encoder)
}

pub fn decode_handshake_response(protocol: &Protocol, decoder: &mut Decoder<'_>) -> Result<HandshakeResponse> {
    protocol.decode_as::<HandshakeResponse>(decoder).map_err(|e| match e {
        ProtocolError::UnexpectedValue { .. } => ProtocolError::HandshakeError(
            crate::error::constants::ERR_HANDSHAKE_RESPONSE.to_string(),
        ),
        other => other,
    })
}
