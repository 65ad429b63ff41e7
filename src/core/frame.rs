//! Tagged frames exchanged once the handshake is done.
//!
//! ```text
//! MESSAGE : [0x01][Protocol encoded Message]
//! RAW     : [0x02][has metadata: 0 | 1 + Protocol encoded value][len: u32 BE][len bytes]
//! ```

use crate::core::buffer::{Decoder, Encoder};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::Message;
use crate::serialization::{downcast_value, Protocol, Value};
use bytes::Bytes;
use std::sync::Arc;

pub const FRAME_MESSAGE: u8 = 0x01;
pub const FRAME_RAW: u8 = 0x02;

/// One decoded inbound frame.
#[derive(Debug, Clone)]
pub enum Frame {
    Message(Message),
    Raw {
        metadata: Option<Arc<dyn Value>>,
        payload: Bytes,
    },
}

pub fn encode_message_frame(protocol: &Protocol, message: &Message, encoder: &mut Encoder<'_>) -> Result<()> {
    encoder.write_u8(FRAME_MESSAGE);
    protocol.encode(message, encoder)
}

pub fn encode_raw_frame(
    protocol: &Protocol,
    payload: &[u8],
    metadata: Option<&dyn Value>,
    encoder: &mut Encoder<'_>,
) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::OversizedFrame(payload.len()))?;
    encoder.write_u8(FRAME_RAW);
    protocol.encode_nullable(metadata, encoder)?;
    encoder.write_u32(len);
    encoder.write_bytes(payload);
    Ok(())
}

/// Decode exactly one frame. Unknown tags are a desync.
pub fn decode_frame(protocol: &Protocol, decoder: &mut Decoder<'_>) -> Result<Frame> {
    match decoder.read_u8()? {
        FRAME_MESSAGE => {
            let value = protocol.decode(decoder)?;
            let message = downcast_value::<Message>(value.as_ref())?;
            Ok(Frame::Message(message.clone()))
        }
        FRAME_RAW => {
            let metadata = protocol.decode_nullable(decoder)?.map(Arc::from);
            let len = decoder.read_u32()? as usize;
            let payload = Bytes::copy_from_slice(decoder.read_bytes(len)?);
            Ok(Frame::Raw { metadata, payload })
        }
        other => Err(ProtocolError::InvalidFrameType(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn protocol() -> Protocol {
        Protocol::builder().build().unwrap()
    }

    #[test]
    fn test_raw_frame_layout_without_metadata() {
        let protocol = protocol();
        let mut buf = BytesMut::new();
        encode_raw_frame(&protocol, b"abc", None, &mut Encoder::new(&mut buf)).unwrap();
        assert_eq!(&buf[..], &[FRAME_RAW, 0, 0, 0, 0, 3, b'a', b'b', b'c']);

        let frame = decode_frame(&protocol, &mut Decoder::new(&buf)).unwrap();
        match frame {
            Frame::Raw { metadata, payload } => {
                assert!(metadata.is_none());
                assert_eq!(&payload[..], b"abc");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_raw_frame_with_metadata() {
        let protocol = protocol();
        let mut buf = BytesMut::new();
        let meta = String::from("chunk-1");
        encode_raw_frame(&protocol, &[9, 8], Some(&meta), &mut Encoder::new(&mut buf)).unwrap();
        assert_eq!(buf[1], 1);

        match decode_frame(&protocol, &mut Decoder::new(&buf)).unwrap() {
            Frame::Raw { metadata, payload } => {
                let metadata = metadata.unwrap();
                assert_eq!(downcast_value::<String>(metadata.as_ref()).unwrap(), "chunk-1");
                assert_eq!(&payload[..], &[9, 8]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_message_frame() {
        let protocol = protocol();
        let message = Message::new(42i64);
        let mut buf = BytesMut::new();
        encode_message_frame(&protocol, &message, &mut Encoder::new(&mut buf)).unwrap();
        assert_eq!(buf[0], FRAME_MESSAGE);

        match decode_frame(&protocol, &mut Decoder::new(&buf)).unwrap() {
            Frame::Message(decoded) => {
                assert_eq!(decoded.identifier(), message.identifier());
                assert_eq!(decoded.body_as::<i64>(), Some(&42));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let protocol = protocol();
        let err = decode_frame(&protocol, &mut Decoder::new(&[0x03, 0, 0])).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFrameType(0x03)));
        assert!(err.is_desync());
    }
}
