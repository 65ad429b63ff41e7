//! # Error Types
//!
//! Error handling for the codec engine, connection layer and transport negotiation.
//!
//! ## Error Categories
//! - **Configuration errors**: duplicate or missing type/marshaller ids, unreadable
//!   manifests. Raised while a [`Protocol`](crate::serialization::Protocol) is built.
//! - **Protocol desync errors**: unknown types, unknown marshallers, bad frame tags,
//!   magic header mismatch. Fatal for the connection they occur on and nothing else.
//! - **Routing errors**: a message addressed to an identity with no live connection.
//! - **Transient I/O errors**: surfaced through the failed write/close futures.
//!
//! ## Example Usage
//! ```rust
//! use wirelink::error::{ProtocolError, Result};
//!
//! fn lookup(found: bool) -> Result<u16> {
//!     if found {
//!         Ok(7)
//!     } else {
//!         Err(ProtocolError::UnknownType("Foo".into()))
//!     }
//! }
//!
//! assert!(lookup(false).unwrap_err().is_desync());
//! ```

use crate::protocol::message::Identifier;
use std::io;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry errors
    pub const ERR_TYPE_NOT_REGISTERED: &str = "Type is not registered";
    pub const ERR_MARSHALLER_NOT_REGISTERED: &str = "No marshaller registered for id";

    /// Connection errors
    pub const ERR_WRITER_GONE: &str = "Connection writer task terminated";
    pub const ERR_NOT_POLLABLE: &str = "Transport does not support polling requests";

    /// Handshake errors
    pub const ERR_HANDSHAKE_EXPECTED: &str = "Expected handshake before frames";
    pub const ERR_HANDSHAKE_RESPONSE: &str = "Peer did not answer the handshake";

    /// Negotiation errors
    pub const ERR_NO_NEGOTIATORS: &str = "No negotiators configured for port";
    pub const ERR_UNCLASSIFIED: &str = "Connection could not be classified";
    pub const ERR_WINDOW_EXCEEDED: &str = "Negotiation window exceeded";
    pub const ERR_TLS_UNAVAILABLE: &str = "TLS detected but no TLS acceptor configured";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    #[error("Type '{0}' does not declare a type id")]
    MissingTypeId(String),

    #[error("Marshaller '{0}' does not declare a marshaller id")]
    MissingMarshallerId(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("No such marshaller: {0}")]
    NoSuchMarshaller(String),

    #[error("No connection registered for '{0}'")]
    NoSuchConnection(Identifier),

    #[error("Illegal frame type: {0:#04x}")]
    InvalidFrameType(u8),

    #[error("Invalid magic header")]
    InvalidMagic,

    #[error("Not enough bytes to decode value")]
    Incomplete,

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("Unexpected value: expected {expected}, found {found}")]
    UnexpectedValue {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Synchronization primitive poisoned")]
    LockPoisoned,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Timeout occurred")]
    Timeout,
}

impl ProtocolError {
    /// Whether this error means the peer and this side no longer agree on the wire
    /// state. Such errors close the affected connection.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownType(_)
                | ProtocolError::NoSuchMarshaller(_)
                | ProtocolError::InvalidFrameType(_)
                | ProtocolError::InvalidMagic
                | ProtocolError::InvalidUtf8
                | ProtocolError::UnexpectedValue { .. }
                | ProtocolError::OversizedFrame(_)
                | ProtocolError::DecompressionFailure
        )
    }

    /// Whether this error is raised while building registries.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConfigError(_)
                | ProtocolError::DuplicateRegistration(_)
                | ProtocolError::MissingTypeId(_)
                | ProtocolError::MissingMarshallerId(_)
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for ProtocolError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        ProtocolError::LockPoisoned
    }
}

impl From<tungstenite::Error> for ProtocolError {
    fn from(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::Io(e) => ProtocolError::Io(e),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => ProtocolError::ConnectionClosed,
            other => ProtocolError::WebSocketError(other.to_string()),
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desync_classification() {
        assert!(ProtocolError::InvalidFrameType(3).is_desync());
        assert!(ProtocolError::InvalidMagic.is_desync());
        assert!(!ProtocolError::ConnectionClosed.is_desync());
        assert!(!ProtocolError::Incomplete.is_desync());
    }

    #[test]
    fn test_websocket_errors_keep_io_and_close() {
        let closed: ProtocolError = tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(closed, ProtocolError::ConnectionClosed));

        let io: ProtocolError = tungstenite::Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)).into();
        assert!(matches!(io, ProtocolError::Io(e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn test_frame_type_display() {
        assert_eq!(
            ProtocolError::InvalidFrameType(3).to_string(),
            "Illegal frame type: 0x03"
        );
    }
}
