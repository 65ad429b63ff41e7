//! # Wire Codec
//!
//! Tokio codec for streaming transports.
//!
//! ## Wire Format
//! ```text
//! opening (initiator → acceptor, once) : [MAGIC_HEADER][logged in][HandshakeRequest]
//! unit    (both directions)            : [Length(4, BE)][frame bytes]
//! ```
//!
//! The acceptor answers the opening with one unit holding the encoded
//! `HandshakeResponse`. When stream compression is negotiated every byte,
//! opening included, travels through the compressor.
//!
//! ## Security
//! - Magic bytes are compared as soon as they arrive, before any decoding
//! - Unit length is validated against `max_frame_size` before buffering

use crate::config::MAGIC_HEADER;
use crate::core::buffer::{Decoder as WireDecoder, Encoder as WireEncoder};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{check_magic, read_handshake, write_handshake, ClientHello, HandshakeRequest};
use crate::serialization::Protocol;
use crate::utils::compression::{CompressionKind, StreamCompressor, StreamDecompressor};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

/// Size of the unit length prefix
const LENGTH_PREFIX: usize = 4;

/// Which end of the physical connection this codec serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecRole {
    /// Expects the handshake opening before any unit
    Acceptor,
    Initiator,
}

/// Items produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Hello(ClientHello),
    Unit(Bytes),
}

/// Items accepted by the encoder.
#[derive(Debug, Clone)]
pub enum Outbound {
    Hello {
        logged_in: bool,
        request: HandshakeRequest,
    },
    Unit(Bytes),
}

pub struct WireCodec {
    protocol: Arc<Protocol>,
    awaiting_hello: bool,
    max_frame_size: usize,
    compressor: Option<StreamCompressor>,
    decompressor: Option<StreamDecompressor>,
    /// Inflated inbound bytes waiting to be framed
    plain: BytesMut,
}

impl WireCodec {
    pub fn new(protocol: Arc<Protocol>, role: CodecRole, max_frame_size: usize) -> Self {
        Self {
            protocol,
            awaiting_hello: role == CodecRole::Acceptor,
            max_frame_size,
            compressor: None,
            decompressor: None,
            plain: BytesMut::new(),
        }
    }

    pub fn with_compression(mut self, kind: Option<CompressionKind>) -> Self {
        self.compressor = kind.map(StreamCompressor::new);
        self.decompressor = kind.map(StreamDecompressor::new);
        self
    }

    pub fn is_compressed(&self) -> bool {
        self.compressor.is_some()
    }
}

fn decode_plain(
    protocol: &Protocol,
    awaiting_hello: &mut bool,
    max_frame_size: usize,
    src: &mut BytesMut,
) -> Result<Option<Inbound>> {
    if *awaiting_hello {
        if !check_magic(src)? {
            return Ok(None);
        }
        if src.len() > MAGIC_HEADER.len() + 1 + max_frame_size {
            return Err(ProtocolError::OversizedFrame(src.len()));
        }
        let mut decoder = WireDecoder::new(src);
        return match read_handshake(protocol, &mut decoder) {
            Ok(hello) => {
                let consumed = decoder.position();
                src.advance(consumed);
                *awaiting_hello = false;
                Ok(Some(Inbound::Hello(hello)))
            }
            Err(ProtocolError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        };
    }

    if src.len() < LENGTH_PREFIX {
        return Ok(None);
    }
    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if len > max_frame_size {
        warn!(len, max_frame_size, "Rejecting oversized unit");
        return Err(ProtocolError::OversizedFrame(len));
    }
    if src.len() < LENGTH_PREFIX + len {
        src.reserve(LENGTH_PREFIX + len - src.len());
        return Ok(None);
    }
    src.advance(LENGTH_PREFIX);
    trace!(len, "Decoded unit");
    Ok(Some(Inbound::Unit(src.split_to(len).freeze())))
}

impl Decoder for WireCodec {
    type Item = Inbound;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decompressor.as_mut() {
            Some(decompressor) => {
                decompressor.decompress(src, &mut self.plain)?;
                decode_plain(&self.protocol, &mut self.awaiting_hello, self.max_frame_size, &mut self.plain)
            }
            None => decode_plain(&self.protocol, &mut self.awaiting_hello, self.max_frame_size, src),
        }
    }
}

impl Encoder<Outbound> for WireCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Outbound, dst: &mut BytesMut) -> Result<()> {
        let mut staged = BytesMut::new();
        let target = if self.compressor.is_some() { &mut staged } else { &mut *dst };

        match item {
            Outbound::Hello { logged_in, request } => {
                write_handshake(&self.protocol, logged_in, &request, &mut WireEncoder::new(target))?;
            }
            Outbound::Unit(frame) => {
                if frame.len() > self.max_frame_size {
                    return Err(ProtocolError::OversizedFrame(frame.len()));
                }
                target.reserve(LENGTH_PREFIX + frame.len());
                target.put_u32(frame.len() as u32);
                target.put_slice(&frame);
            }
        }

        if let Some(compressor) = self.compressor.as_mut() {
            compressor.compress(&staged, dst)?;
        }
        Ok(())
    }
}
