//! Integration tests for the Protocol codec engine
//!
//! Covers application types carried by dedicated marshallers, self-encoding
//! and enum-like types, manifests and the diagnostic lookahead.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::uninlined_format_args
)]

use std::any::Any;
use std::sync::Arc;
use wirelink::core::buffer::{Decoder, Encoder};
use wirelink::error::ProtocolError;
use wirelink::serialization::{
    filter_fn, Enumerable, FilterDecision, Marshallable, Marshaller, MarshallerConfiguration, Protocol,
    TypeDescriptor, TypeId, Value,
};
use wirelink::{Identifier, Message};

#[derive(Debug, Clone, PartialEq)]
struct Foo {
    name: String,
    count: i32,
}

impl Value for Foo {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct FooMarshaller;

impl Marshaller for FooMarshaller {
    fn name(&self) -> &'static str {
        "foo"
    }

    fn marshall(&self, value: &dyn Value, encoder: &mut Encoder<'_>, _: &Protocol) -> wirelink::Result<()> {
        let foo = wirelink::serialization::downcast_value::<Foo>(value)?;
        encoder.write_string(&foo.name)?;
        encoder.write_compressed_i32(foo.count);
        Ok(())
    }

    fn unmarshall(&self, decoder: &mut Decoder<'_>, _: &Protocol) -> wirelink::Result<Box<dyn Value>> {
        Ok(Box::new(Foo {
            name: decoder.read_string()?,
            count: decoder.read_compressed_i32()?,
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Position {
    x: f64,
    y: f64,
}

impl Value for Position {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_marshallable(&self) -> Option<&dyn Marshallable> {
        Some(self)
    }
}

impl Marshallable for Position {
    fn marshall(&self, encoder: &mut Encoder<'_>, _: &Protocol) -> wirelink::Result<()> {
        encoder.write_f64(self.x);
        encoder.write_f64(self.y);
        Ok(())
    }

    fn unmarshall(decoder: &mut Decoder<'_>, _: &Protocol) -> wirelink::Result<Self> {
        Ok(Self {
            x: decoder.read_f64()?,
            y: decoder.read_f64()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Color {
    Red,
    Green,
}

impl Value for Color {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_enumerable(&self) -> Option<&dyn Enumerable> {
        Some(self)
    }
}

impl Enumerable for Color {
    fn flag(&self) -> i32 {
        match self {
            Color::Red => 1,
            Color::Green => 2,
        }
    }

    fn from_flag(flag: i32) -> Option<Self> {
        match flag {
            1 => Some(Color::Red),
            2 => Some(Color::Green),
            _ => None,
        }
    }
}

fn protocol() -> Protocol {
    Protocol::builder()
        .register_type(TypeDescriptor::new::<Foo>("Foo", 10))
        .register_type(TypeDescriptor::marshallable::<Position>("Position", 11))
        .register_type(TypeDescriptor::enumerable::<Color>("Color", 12))
        .marshaller(MarshallerConfiguration::for_type::<Foo>(Arc::new(FooMarshaller), Some(5)))
        .build()
        .expect("protocol should build")
}

#[test]
fn test_foo_starts_with_marshaller_id() {
    let protocol = protocol();
    let foo = Foo {
        name: "widget".to_string(),
        count: 42,
    };

    let bytes = protocol.encode_to_bytes(&foo).expect("Failed to encode");
    assert_eq!(&bytes[..2], &[0x00, 0x05]);

    let decoded = protocol.decode(&mut Decoder::new(&bytes)).expect("Failed to decode");
    assert_eq!(decoded.as_any().downcast_ref::<Foo>(), Some(&foo));
}

#[test]
fn test_marshallable_carries_type_id() {
    let protocol = protocol();
    let position = Position { x: 1.5, y: -2.0 };

    let bytes = protocol.encode_to_bytes(&position).unwrap();
    // marshallable marshaller id, then type id 11
    assert_eq!(&bytes[2..4], &[0x00, 0x0B]);

    let mut decoder = Decoder::new(&bytes);
    let decoded: Position = protocol.decode_as(&mut decoder).unwrap();
    assert_eq!(decoded, position);
    assert!(decoder.is_exhausted());
}

#[test]
fn test_enumerable_rebuilt_from_flag() {
    let protocol = protocol();

    let bytes = protocol.encode_to_bytes(&Color::Green).unwrap();
    let decoded: Color = protocol.decode_as(&mut Decoder::new(&bytes)).unwrap();
    assert_eq!(decoded, Color::Green);
}

#[test]
fn test_message_body_survives_envelope() {
    let protocol = protocol();
    let message = Message::new(Foo {
        name: "inner".to_string(),
        count: -7,
    });

    let bytes = protocol.encode_to_bytes(&message).unwrap();
    let decoded: Message = protocol.decode_as(&mut Decoder::new(&bytes)).unwrap();
    assert_eq!(decoded.identifier(), message.identifier());
    assert_eq!(decoded.body_as::<Foo>(), message.body_as::<Foo>());
}

#[test]
fn test_peek_type_sees_through_envelopes() {
    let protocol = protocol();

    let bytes = protocol.encode_to_bytes(&Message::new(Position { x: 0.0, y: 0.0 })).unwrap();
    let mut decoder = Decoder::new(&bytes);
    let descriptor = protocol.peek_type(&mut decoder).expect("body type should be found");
    assert_eq!(descriptor.name(), "Position");
    assert_eq!(descriptor.type_id(), Some(TypeId(11)));
    assert_eq!(decoder.position(), 0, "peek must not consume");
}

#[test]
fn test_unregistered_value_has_no_marshaller() {
    #[derive(Debug)]
    struct Stranger;
    impl Value for Stranger {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    match protocol().encode_to_bytes(&Stranger) {
        Err(ProtocolError::NoSuchMarshaller(name)) => assert!(name.contains("Stranger")),
        other => panic!("expected NoSuchMarshaller, got {:?}", other),
    }
}

#[test]
fn test_unknown_marshaller_id_leaves_decoder_untouched() {
    let protocol = protocol();
    let bytes = [0x12, 0x34, 0x00];

    let mut decoder = Decoder::new(&bytes);
    assert!(matches!(protocol.decode(&mut decoder), Err(ProtocolError::NoSuchMarshaller(_))));
    assert_eq!(decoder.position(), 0);
}

#[test]
fn test_duplicate_ids_fail_at_build() {
    let result = Protocol::builder()
        .register_type(TypeDescriptor::new::<Foo>("Foo", 10))
        .register_type(TypeDescriptor::enumerable::<Color>("Color", 10))
        .build();
    assert!(matches!(result, Err(ProtocolError::DuplicateRegistration(_))));

    let result = Protocol::builder()
        .marshaller(MarshallerConfiguration::for_type::<Foo>(Arc::new(FooMarshaller), Some(5)))
        .marshaller(MarshallerConfiguration::for_type::<Position>(Arc::new(FooMarshaller), Some(5)))
        .build();
    assert!(matches!(result, Err(ProtocolError::DuplicateRegistration(_))));
}

#[test]
fn test_marshaller_without_id_is_rejected() {
    let result = Protocol::builder()
        .marshaller(MarshallerConfiguration::for_type::<Foo>(Arc::new(FooMarshaller), None))
        .build();
    assert!(matches!(result, Err(ProtocolError::MissingMarshallerId(_))));
}

#[test]
fn test_manifest_registers_catalogued_types() {
    let protocol = Protocol::builder()
        .catalog(TypeDescriptor::new::<Foo>("Foo", 10))
        .catalog(TypeDescriptor::enumerable::<Color>("Color", 12))
        .manifest("# domain types\nFoo\n\n  Color  \n")
        .build()
        .unwrap();
    assert_eq!(protocol.types().len(), 2);
    assert_eq!(protocol.types().id_of_type::<Color>().unwrap(), TypeId(12));

    let result = Protocol::builder().manifest("Missing\n").build();
    match result {
        Err(ProtocolError::ConfigError(message)) => assert!(message.contains("Missing")),
        other => panic!("expected ConfigError, got {:?}", other.err()),
    }
}

#[test]
fn test_filter_selects_marshaller_for_family() {
    #[derive(Debug, Clone, PartialEq)]
    struct Tagged(Identifier);
    impl Value for Tagged {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct TaggedMarshaller;
    impl Marshaller for TaggedMarshaller {
        fn name(&self) -> &'static str {
            "tagged"
        }

        fn marshall(&self, value: &dyn Value, encoder: &mut Encoder<'_>, _: &Protocol) -> wirelink::Result<()> {
            let tagged = wirelink::serialization::downcast_value::<Tagged>(value)?;
            encoder.write_bytes(tagged.0.as_bytes());
            Ok(())
        }

        fn unmarshall(&self, decoder: &mut Decoder<'_>, _: &Protocol) -> wirelink::Result<Box<dyn Value>> {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(decoder.read_bytes(16)?);
            Ok(Box::new(Tagged(Identifier::from_bytes(bytes))))
        }
    }

    let protocol = Protocol::builder()
        .marshaller(MarshallerConfiguration::for_filter(
            filter_fn(|value| {
                if value.as_any().is::<Tagged>() {
                    FilterDecision::AcceptedAndCache
                } else {
                    FilterDecision::Rejected
                }
            }),
            Arc::new(TaggedMarshaller),
            Some(20),
        ))
        .build()
        .unwrap();

    let tagged = Tagged(Identifier::random());
    let bytes = protocol.encode_to_bytes(&tagged).unwrap();
    assert_eq!(&bytes[..2], &[0x00, 20]);
    let decoded: Tagged = protocol.decode_as(&mut Decoder::new(&bytes)).unwrap();
    assert_eq!(decoded, tagged);
}
