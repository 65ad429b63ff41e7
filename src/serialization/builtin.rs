//! Marshallers every protocol carries.
//!
//! Their ids sit in the reserved range starting at [`ids::RESERVED_BASE`] so
//! they never collide with application marshaller ids.

use crate::core::buffer::{Decoder, Encoder};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{HandshakeRequest, HandshakeResponse};
use crate::protocol::message::{Identifier, Message, MessageType, PollingRequest};
use crate::serialization::marshaller::{
    filter_fn, DebuggableMarshaller, FilterDecision, Marshaller, MarshallerConfiguration, MarshallerId,
};
use crate::serialization::types::TypeDescriptor;
use crate::serialization::value::{downcast_value, Value};
use crate::serialization::Protocol;
use std::sync::Arc;

pub mod ids {
    pub const RESERVED_BASE: u16 = 0xFF00;

    pub const MESSAGE: u16 = 0xFF01;
    pub const IDENTIFIER: u16 = 0xFF02;
    pub const I8: u16 = 0xFF03;
    pub const I16: u16 = 0xFF04;
    pub const I32: u16 = 0xFF05;
    pub const I64: u16 = 0xFF06;
    pub const F32: u16 = 0xFF07;
    pub const F64: u16 = 0xFF08;
    pub const BOOL: u16 = 0xFF09;
    pub const STRING: u16 = 0xFF0A;
    pub const BYTES: u16 = 0xFF0B;

    pub const MARSHALLABLE: u16 = 0xFF10;
    pub const ENUMERABLE: u16 = 0xFF11;

    pub const POLLING_REQUEST: u16 = 0xFF20;
    pub const HANDSHAKE_REQUEST: u16 = 0xFF21;
    pub const HANDSHAKE_RESPONSE: u16 = 0xFF22;
}

pub(crate) fn write_identifier(encoder: &mut Encoder<'_>, identifier: &Identifier) {
    encoder.write_bytes(identifier.as_bytes());
}

pub(crate) fn read_identifier(decoder: &mut Decoder<'_>) -> Result<Identifier> {
    let mut bytes = [0u8; Identifier::LEN];
    bytes.copy_from_slice(decoder.read_bytes(Identifier::LEN)?);
    Ok(Identifier::from_bytes(bytes))
}

/// Fixed encoding of a single Rust type.
struct Primitive<T> {
    name: &'static str,
    id: u16,
    write: fn(&mut Encoder<'_>, &T) -> Result<()>,
    read: fn(&mut Decoder<'_>) -> Result<T>,
}

impl<T: Value> Marshaller for Primitive<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn identifier(&self) -> Option<MarshallerId> {
        Some(MarshallerId(self.id))
    }

    fn marshall(&self, value: &dyn Value, encoder: &mut Encoder<'_>, _: &Protocol) -> Result<()> {
        (self.write)(encoder, downcast_value::<T>(value)?)
    }

    fn unmarshall(&self, decoder: &mut Decoder<'_>, _: &Protocol) -> Result<Box<dyn Value>> {
        Ok(Box::new((self.read)(decoder)?))
    }
}

fn primitive<T: Value>(
    name: &'static str,
    id: u16,
    write: fn(&mut Encoder<'_>, &T) -> Result<()>,
    read: fn(&mut Decoder<'_>) -> Result<T>,
) -> MarshallerConfiguration {
    MarshallerConfiguration::for_type::<T>(Arc::new(Primitive { name, id, write, read }), None)
}

/// Envelope: identifier, message type byte, then the body as a nested value.
struct MessageMarshaller;

impl Marshaller for MessageMarshaller {
    fn name(&self) -> &'static str {
        "message"
    }

    fn identifier(&self) -> Option<MarshallerId> {
        Some(MarshallerId(ids::MESSAGE))
    }

    fn marshall(&self, value: &dyn Value, encoder: &mut Encoder<'_>, protocol: &Protocol) -> Result<()> {
        let message = downcast_value::<Message>(value)?;
        write_identifier(encoder, &message.identifier());
        encoder.write_u8(message.message_type().to_byte());
        protocol.encode(message.body(), encoder)
    }

    fn unmarshall(&self, decoder: &mut Decoder<'_>, protocol: &Protocol) -> Result<Box<dyn Value>> {
        let identifier = read_identifier(decoder)?;
        let message_type = MessageType::from_byte(decoder.read_u8()?);
        let body = protocol.decode(decoder)?;
        Ok(Box::new(Message::with_identifier(identifier, Arc::from(body), message_type)))
    }

    fn as_debuggable(&self) -> Option<&dyn DebuggableMarshaller> {
        Some(self)
    }
}

impl DebuggableMarshaller for MessageMarshaller {
    /// Type of the body.
    fn find_type<'p>(&self, decoder: &mut Decoder<'_>, protocol: &'p Protocol) -> Option<&'p TypeDescriptor> {
        decoder.read_bytes(Identifier::LEN + 1).ok()?;
        protocol.peek_type(decoder)
    }

    fn debug_value(&self, value: &dyn Value) -> String {
        match downcast_value::<Message>(value) {
            Ok(message) => format!(
                "Message[{}, {:?}] {:?}",
                message.identifier(),
                message.message_type(),
                message.body()
            ),
            Err(_) => format!("{:?}", value),
        }
    }
}

/// Self-encoding values, tagged with their type id.
struct MarshallableMarshaller;

impl Marshaller for MarshallableMarshaller {
    fn name(&self) -> &'static str {
        "marshallable"
    }

    fn identifier(&self) -> Option<MarshallerId> {
        Some(MarshallerId(ids::MARSHALLABLE))
    }

    fn marshall(&self, value: &dyn Value, encoder: &mut Encoder<'_>, protocol: &Protocol) -> Result<()> {
        let marshallable = value.as_marshallable().ok_or(ProtocolError::UnexpectedValue {
            expected: "Marshallable",
            found: value.type_name(),
        })?;
        protocol.write_type_id(value, encoder)?;
        marshallable.marshall(encoder, protocol)
    }

    fn unmarshall(&self, decoder: &mut Decoder<'_>, protocol: &Protocol) -> Result<Box<dyn Value>> {
        protocol.read_typed_value(decoder)
    }

    fn as_debuggable(&self) -> Option<&dyn DebuggableMarshaller> {
        Some(self)
    }
}

impl DebuggableMarshaller for MarshallableMarshaller {
    fn find_type<'p>(&self, decoder: &mut Decoder<'_>, protocol: &'p Protocol) -> Option<&'p TypeDescriptor> {
        protocol.read_type_id(decoder).ok()
    }
}

/// Enum-like values: type id plus an `i32` flag.
struct EnumerableMarshaller;

impl Marshaller for EnumerableMarshaller {
    fn name(&self) -> &'static str {
        "enumerable"
    }

    fn identifier(&self) -> Option<MarshallerId> {
        Some(MarshallerId(ids::ENUMERABLE))
    }

    fn marshall(&self, value: &dyn Value, encoder: &mut Encoder<'_>, protocol: &Protocol) -> Result<()> {
        let enumerable = value.as_enumerable().ok_or(ProtocolError::UnexpectedValue {
            expected: "Enumerable",
            found: value.type_name(),
        })?;
        protocol.write_type_id(value, encoder)?;
        encoder.write_i32(enumerable.flag());
        Ok(())
    }

    fn unmarshall(&self, decoder: &mut Decoder<'_>, protocol: &Protocol) -> Result<Box<dyn Value>> {
        let descriptor = protocol.read_type_id(decoder)?;
        let flag = decoder.read_i32()?;
        descriptor.construct_from_flag(flag)
    }

    fn as_debuggable(&self) -> Option<&dyn DebuggableMarshaller> {
        Some(self)
    }
}

impl DebuggableMarshaller for EnumerableMarshaller {
    fn find_type<'p>(&self, decoder: &mut Decoder<'_>, protocol: &'p Protocol) -> Option<&'p TypeDescriptor> {
        protocol.read_type_id(decoder).ok()
    }
}

/// Marshaller configurations applied before any application configuration.
pub fn builtin_marshallers() -> Vec<MarshallerConfiguration> {
    vec![
        MarshallerConfiguration::for_type::<Message>(Arc::new(MessageMarshaller), None),
        primitive::<Identifier>(
            "identifier",
            ids::IDENTIFIER,
            |e, v| {
                write_identifier(e, v);
                Ok(())
            },
            read_identifier,
        ),
        primitive::<i8>("i8", ids::I8, |e, v| {
            e.write_i8(*v);
            Ok(())
        }, |d| d.read_i8()),
        primitive::<i16>("i16", ids::I16, |e, v| {
            e.write_i16(*v);
            Ok(())
        }, |d| d.read_i16()),
        primitive::<i32>("i32", ids::I32, |e, v| {
            e.write_i32(*v);
            Ok(())
        }, |d| d.read_i32()),
        primitive::<i64>("i64", ids::I64, |e, v| {
            e.write_i64(*v);
            Ok(())
        }, |d| d.read_i64()),
        primitive::<f32>("f32", ids::F32, |e, v| {
            e.write_f32(*v);
            Ok(())
        }, |d| d.read_f32()),
        primitive::<f64>("f64", ids::F64, |e, v| {
            e.write_f64(*v);
            Ok(())
        }, |d| d.read_f64()),
        primitive::<bool>("bool", ids::BOOL, |e, v| {
            e.write_bool(*v);
            Ok(())
        }, |d| d.read_bool()),
        primitive::<String>("string", ids::STRING, |e, v| e.write_string(v), |d| d.read_string()),
        primitive::<Vec<u8>>("bytes", ids::BYTES, |e, v| e.write_byte_array(v), |d| d.read_byte_array()),
        primitive::<PollingRequest>(
            "polling-request",
            ids::POLLING_REQUEST,
            |_, _| Ok(()),
            |_| Ok(PollingRequest),
        ),
        primitive::<HandshakeRequest>(
            "handshake-request",
            ids::HANDSHAKE_REQUEST,
            |e, v| {
                match &v.connection_id {
                    Some(id) => {
                        e.write_bool(true);
                        write_identifier(e, id);
                    }
                    None => e.write_bool(false),
                }
                Ok(())
            },
            |d| {
                let connection_id = if d.read_bool()? { Some(read_identifier(d)?) } else { None };
                Ok(HandshakeRequest { connection_id })
            },
        ),
        primitive::<HandshakeResponse>(
            "handshake-response",
            ids::HANDSHAKE_RESPONSE,
            |e, v| {
                write_identifier(e, &v.connection_id);
                Ok(())
            },
            |d| Ok(HandshakeResponse { connection_id: read_identifier(d)? }),
        ),
        MarshallerConfiguration::for_filter(
            filter_fn(|value| match value.as_marshallable() {
                Some(_) => FilterDecision::AcceptedAndCache,
                None => FilterDecision::Rejected,
            }),
            Arc::new(MarshallableMarshaller),
            None,
        ),
        MarshallerConfiguration::for_filter(
            filter_fn(|value| match value.as_enumerable() {
                Some(_) => FilterDecision::AcceptedAndCache,
                None => FilterDecision::Rejected,
            }),
            Arc::new(EnumerableMarshaller),
            None,
        ),
    ]
}
