//! Property-based tests using proptest
//!
//! These tests validate protocol invariants across a wide range of randomly
//! generated inputs: arbitrary chunking of the byte stream, hostile input to
//! the decoders and the negotiation pipeline.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use std::sync::Arc;
use tokio_util::codec::{Decoder as _, Encoder as _};
use wirelink::config::MAGIC_HEADER;
use wirelink::core::buffer::{Decoder, Encoder};
use wirelink::core::codec::{CodecRole, Inbound, Outbound, WireCodec};
use wirelink::negotiation::{
    Framing, NegotiationPipeline, Negotiator, Step, GZIP_NEGOTIATOR, HTTP_NEGOTIATOR, MAGIC_NEGOTIATOR,
    SNAPPY_NEGOTIATOR, TLS_NEGOTIATOR, WEBSOCKET_NEGOTIATOR,
};
use wirelink::protocol::handshake::HandshakeRequest;
use wirelink::utils::compression::CompressionKind;
use wirelink::{Identifier, Protocol};

fn protocol() -> Arc<Protocol> {
    Arc::new(Protocol::builder().build().unwrap())
}

fn compression() -> impl Strategy<Value = Option<CompressionKind>> {
    prop_oneof![
        Just(None),
        Just(Some(CompressionKind::Gzip)),
        Just(Some(CompressionKind::Snappy)),
    ]
}

fn all_negotiators() -> Vec<&'static dyn Negotiator> {
    vec![
        &MAGIC_NEGOTIATOR as &dyn Negotiator,
        &HTTP_NEGOTIATOR as &dyn Negotiator,
        &WEBSOCKET_NEGOTIATOR as &dyn Negotiator,
        &TLS_NEGOTIATOR as &dyn Negotiator,
        &GZIP_NEGOTIATOR as &dyn Negotiator,
        &SNAPPY_NEGOTIATOR as &dyn Negotiator,
    ]
}

// Property: units arrive intact and in order however the stream is chunked
proptest! {
    #[test]
    fn prop_units_survive_any_chunking(
        units in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 0..16),
        chunk in 1usize..64,
        kind in compression(),
    ) {
        let protocol = protocol();
        let mut client = WireCodec::new(protocol.clone(), CodecRole::Initiator, 1024).with_compression(kind);
        let mut server = WireCodec::new(protocol, CodecRole::Acceptor, 1024).with_compression(kind);

        let mut wire = BytesMut::new();
        client.encode(Outbound::Hello { logged_in: false, request: HandshakeRequest::default() }, &mut wire).unwrap();
        for unit in &units {
            client.encode(Outbound::Unit(Bytes::from(unit.clone())), &mut wire).unwrap();
        }

        let mut received = Vec::new();
        let mut src = BytesMut::new();
        for piece in wire.chunks(chunk) {
            src.extend_from_slice(piece);
            while let Some(item) = server.decode(&mut src).expect("stream should decode") {
                received.push(item);
            }
        }

        prop_assert_eq!(received.len(), units.len() + 1);
        prop_assert!(matches!(received[0], Inbound::Hello(_)), "handshake must come first");
        for (item, unit) in received[1..].iter().zip(&units) {
            prop_assert_eq!(item, &Inbound::Unit(Bytes::from(unit.clone())));
        }
    }
}

// Property: an acceptor never yields anything for a stream with a foreign opening
proptest! {
    #[test]
    fn prop_foreign_opening_rejected(prefix in prop::collection::vec(any::<u8>(), 4..32)) {
        prop_assume!(prefix[..4] != MAGIC_HEADER);
        let mut server = WireCodec::new(protocol(), CodecRole::Acceptor, 1024);
        let mut src = BytesMut::from(&prefix[..]);
        prop_assert!(server.decode(&mut src).is_err());
    }
}

// Property: decoding garbage never panics and a failed decode consumes nothing
proptest! {
    #[test]
    fn prop_decode_garbage_restores_position(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let protocol = protocol();
        let mut decoder = Decoder::new(&bytes);
        if protocol.decode(&mut decoder).is_err() {
            prop_assert_eq!(decoder.position(), 0);
        }
    }
}

/// Encode `value` through the protocol and decode it back as the same type.
fn through_protocol<T: wirelink::Value + Clone>(protocol: &Protocol, value: T) -> T {
    let bytes = protocol.encode_to_bytes(&value).unwrap();
    let mut decoder = Decoder::new(&bytes);
    let decoded = protocol.decode_as::<T>(&mut decoder).unwrap();
    assert!(decoder.is_exhausted());
    decoded
}

// Property: every built-in marshaller returns the value it was given
proptest! {
    #[test]
    fn prop_builtin_values_survive_protocol(
        a in any::<i8>(),
        b in any::<i16>(),
        c in any::<i32>(),
        d in any::<i64>(),
        e in any::<f32>(),
        f in any::<f64>(),
        flag in any::<bool>(),
        text in ".*",
        blob in prop::collection::vec(any::<u8>(), 0..256),
        id in any::<[u8; 16]>(),
    ) {
        let protocol = protocol();
        prop_assert_eq!(through_protocol(&protocol, a), a);
        prop_assert_eq!(through_protocol(&protocol, b), b);
        prop_assert_eq!(through_protocol(&protocol, c), c);
        prop_assert_eq!(through_protocol(&protocol, d), d);
        // bit patterns, so NaN payloads count too
        prop_assert_eq!(through_protocol(&protocol, e).to_bits(), e.to_bits());
        prop_assert_eq!(through_protocol(&protocol, f).to_bits(), f.to_bits());
        prop_assert_eq!(through_protocol(&protocol, flag), flag);
        prop_assert_eq!(through_protocol(&protocol, text.clone()), text);
        prop_assert_eq!(through_protocol(&protocol, blob.clone()), blob);
        let id = Identifier::from_bytes(id);
        prop_assert_eq!(through_protocol(&protocol, id), id);
    }
}

// Property: compressed integers round-trip at every magnitude
proptest! {
    #[test]
    fn prop_compressed_integers(a in any::<i32>(), b in any::<i64>()) {
        let mut buf = BytesMut::new();
        let mut encoder = Encoder::new(&mut buf);
        encoder.write_compressed_i32(a);
        encoder.write_compressed_i64(b);

        let mut decoder = Decoder::new(&buf);
        prop_assert_eq!(decoder.read_compressed_i32().unwrap(), a);
        prop_assert_eq!(decoder.read_compressed_i64().unwrap(), b);
        prop_assert!(decoder.is_exhausted());
    }
}

// Property: identifiers survive their text form
proptest! {
    #[test]
    fn prop_identifier_text(bytes in any::<[u8; 16]>()) {
        let id = Identifier::from_bytes(bytes);
        prop_assert_eq!(id.to_string().parse::<Identifier>().unwrap(), id);
    }
}

// Property: the pipeline terminates on any input and plaintext is never HTTP/2
proptest! {
    #[test]
    fn prop_pipeline_total_on_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let pipeline = NegotiationPipeline::new(&all_negotiators());
        match pipeline.advance(&bytes, true) {
            Ok(Step::Resolved(resolution)) => prop_assert_ne!(resolution.framing, Framing::Http2),
            Ok(Step::NeedMore) => prop_assert!(false, "no progress at the window limit"),
            Ok(Step::StartTls) | Err(_) => {}
        }
    }
}

// Property: a raw opening resolves to raw streaming whatever follows it
proptest! {
    #[test]
    fn prop_raw_opening_resolves_with_any_tail(
        tail in prop::collection::vec(any::<u8>(), 0..64),
        logged_in in any::<bool>(),
    ) {
        let protocol = protocol();
        let mut opening = BytesMut::new();
        wirelink::protocol::handshake::write_handshake(
            &protocol,
            logged_in,
            &HandshakeRequest::default(),
            &mut Encoder::new(&mut opening),
        ).unwrap();
        opening.extend_from_slice(&tail);

        let pipeline = NegotiationPipeline::new(&all_negotiators());
        match pipeline.advance(&opening, false).unwrap() {
            Step::Resolved(resolution) => {
                prop_assert_eq!(resolution.framing, Framing::RawStreaming);
                prop_assert_eq!(resolution.compression, None);
            }
            _ => prop_assert!(false, "raw opening must resolve"),
        }
    }
}
