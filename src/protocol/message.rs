use crate::error::{ProtocolError, Result};
use crate::serialization::Value;
use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Globally unique identity of a connection, also used for message correlation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier([u8; 16]);

impl Identifier {
    pub const LEN: usize = 16;

    pub fn random() -> Self {
        Self(rand::random())
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self)
    }
}

impl FromStr for Identifier {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let hex: Vec<u8> = s.bytes().filter(|b| *b != b'-').collect();
        if hex.len() != Self::LEN * 2 {
            return Err(ProtocolError::UnexpectedValue {
                expected: "32 hex digits",
                found: "malformed identifier",
            });
        }
        let mut bytes = [0u8; 16];
        for (slot, pair) in bytes.iter_mut().zip(hex.chunks(2)) {
            let digits = std::str::from_utf8(pair).map_err(|_| ProtocolError::InvalidUtf8)?;
            *slot = u8::from_str_radix(digits, 16).map_err(|_| ProtocolError::UnexpectedValue {
                expected: "hex digit",
                found: "non-hex character",
            })?;
        }
        Ok(Self(bytes))
    }
}

impl Value for Identifier {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Kind of a message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageType {
    #[default]
    Default,
    /// Application-defined kind
    Custom(u8),
}

impl MessageType {
    pub fn to_byte(self) -> u8 {
        match self {
            MessageType::Default => 0,
            MessageType::Custom(kind) => kind,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => MessageType::Default,
            kind => MessageType::Custom(kind),
        }
    }
}

/// Immutable envelope exchanged between connections.
#[derive(Debug, Clone)]
pub struct Message {
    identifier: Identifier,
    body: Arc<dyn Value>,
    message_type: MessageType,
}

impl Message {
    /// New message with a fresh correlation identifier.
    pub fn new<T: Value>(body: T) -> Self {
        Self::with_identifier(Identifier::random(), Arc::new(body), MessageType::Default)
    }

    pub fn with_identifier(identifier: Identifier, body: Arc<dyn Value>, message_type: MessageType) -> Self {
        Self {
            identifier,
            body,
            message_type,
        }
    }

    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    pub fn body(&self) -> &dyn Value {
        self.body.as_ref()
    }

    pub fn shared_body(&self) -> Arc<dyn Value> {
        Arc::clone(&self.body)
    }

    pub fn body_as<T: Value>(&self) -> Option<&T> {
        self.body.as_any().downcast_ref::<T>()
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }
}

impl Value for Message {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Body sent by request/response transports to collect pending frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollingRequest;

impl Value for PollingRequest {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
