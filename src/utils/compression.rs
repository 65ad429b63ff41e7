//! Whole-stream compression layered under the frame codec.
//!
//! Both directions are stateful: the compressor keeps one deflate/snappy
//! stream open for the lifetime of the connection and flushes after every
//! unit so the peer can decode it immediately.
//!
//! - **Gzip**: `flate2` gzip stream, sync-flushed per write
//! - **Snappy**: snappy framing format (stream identifier + data chunks)

use crate::error::{ProtocolError, Result};
use bytes::{Buf, BytesMut};
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use snap::write::FrameEncoder;
use std::io::Write;

/// Leading bytes of a gzip stream
pub const GZIP_SIGNATURE: [u8; 2] = [0x1f, 0x8b];

/// Snappy framing stream identifier chunk
pub const SNAPPY_SIGNATURE: [u8; 10] = [0xff, 0x06, 0x00, 0x00, b's', b'N', b'a', b'P', b'p', b'Y'];

const SNAPPY_CHUNK_STREAM_ID: u8 = 0xff;
const SNAPPY_CHUNK_COMPRESSED: u8 = 0x00;
const SNAPPY_CHUNK_UNCOMPRESSED: u8 = 0x01;

/// Largest chunk the snappy framing format allows (16MB - 1)
const SNAPPY_MAX_CHUNK_LEN: usize = (1 << 24) - 1;

const SNAPPY_CRC_MASK_DELTA: u32 = 0xa282_ead8;

/// CRC-32C of `data`, masked the way snappy framing stores it.
fn masked_crc32c(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    crc.rotate_right(15).wrapping_add(SNAPPY_CRC_MASK_DELTA)
}

fn verify_checksum(stored: &[u8], plain: &[u8]) -> Result<()> {
    let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
    if stored != masked_crc32c(plain) {
        return Err(ProtocolError::DecompressionFailure);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionKind {
    Gzip,
    Snappy,
}

impl CompressionKind {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionKind::Gzip => "gzip",
            CompressionKind::Snappy => "snappy",
        }
    }
}

/// Outbound side of a compressed stream.
pub enum StreamCompressor {
    Gzip(GzEncoder<Vec<u8>>),
    Snappy(FrameEncoder<Vec<u8>>),
}

impl StreamCompressor {
    pub fn new(kind: CompressionKind) -> Self {
        match kind {
            CompressionKind::Gzip => StreamCompressor::Gzip(GzEncoder::new(Vec::new(), Compression::default())),
            CompressionKind::Snappy => StreamCompressor::Snappy(FrameEncoder::new(Vec::new())),
        }
    }

    /// Compress `data` and return every byte the stream produced so far.
    ///
    /// # Errors
    /// Returns `ProtocolError::CompressionFailure` if the encoder fails
    pub fn compress(&mut self, data: &[u8], out: &mut BytesMut) -> Result<()> {
        let produced = match self {
            StreamCompressor::Gzip(encoder) => {
                encoder.write_all(data).map_err(|_| ProtocolError::CompressionFailure)?;
                encoder.flush().map_err(|_| ProtocolError::CompressionFailure)?;
                std::mem::take(encoder.get_mut())
            }
            StreamCompressor::Snappy(encoder) => {
                encoder.write_all(data).map_err(|_| ProtocolError::CompressionFailure)?;
                encoder.flush().map_err(|_| ProtocolError::CompressionFailure)?;
                std::mem::take(encoder.get_mut())
            }
        };
        out.extend_from_slice(&produced);
        Ok(())
    }
}

/// Inbound side of a compressed stream.
pub enum StreamDecompressor {
    Gzip(GzDecoder<Vec<u8>>),
    Snappy(SnappyFrameDecoder),
}

impl StreamDecompressor {
    pub fn new(kind: CompressionKind) -> Self {
        match kind {
            CompressionKind::Gzip => StreamDecompressor::Gzip(GzDecoder::new(Vec::new())),
            CompressionKind::Snappy => StreamDecompressor::Snappy(SnappyFrameDecoder::default()),
        }
    }

    /// Feed compressed bytes from the wire and append whatever plain bytes
    /// become available to `out`. Partial input is buffered internally.
    ///
    /// # Errors
    /// Returns `ProtocolError::DecompressionFailure` on a corrupt stream
    pub fn decompress(&mut self, input: &mut BytesMut, out: &mut BytesMut) -> Result<()> {
        match self {
            StreamDecompressor::Gzip(decoder) => {
                decoder.write_all(input).map_err(|_| ProtocolError::DecompressionFailure)?;
                decoder.flush().map_err(|_| ProtocolError::DecompressionFailure)?;
                input.clear();
                out.extend_from_slice(&std::mem::take(decoder.get_mut()));
                Ok(())
            }
            StreamDecompressor::Snappy(decoder) => decoder.decode(input, out),
        }
    }
}

/// Incremental reader for the snappy framing format. Every data chunk's
/// checksum is verified against its uncompressed bytes.
#[derive(Default)]
pub struct SnappyFrameDecoder {
    seen_stream_id: bool,
    raw: snap::raw::Decoder,
}

impl SnappyFrameDecoder {
    fn decode(&mut self, input: &mut BytesMut, out: &mut BytesMut) -> Result<()> {
        while input.len() >= 4 {
            let chunk_type = input[0];
            let len = usize::from(input[1]) | usize::from(input[2]) << 8 | usize::from(input[3]) << 16;
            if len > SNAPPY_MAX_CHUNK_LEN {
                return Err(ProtocolError::DecompressionFailure);
            }
            if input.len() < 4 + len {
                break;
            }
            input.advance(4);
            let body = input.split_to(len);

            match chunk_type {
                SNAPPY_CHUNK_STREAM_ID => {
                    if body[..] != SNAPPY_SIGNATURE[4..] {
                        return Err(ProtocolError::DecompressionFailure);
                    }
                    self.seen_stream_id = true;
                }
                _ if !self.seen_stream_id => return Err(ProtocolError::DecompressionFailure),
                SNAPPY_CHUNK_COMPRESSED => {
                    if body.len() < 4 {
                        return Err(ProtocolError::DecompressionFailure);
                    }
                    let plain = self
                        .raw
                        .decompress_vec(&body[4..])
                        .map_err(|_| ProtocolError::DecompressionFailure)?;
                    verify_checksum(&body[..4], &plain)?;
                    out.extend_from_slice(&plain);
                }
                SNAPPY_CHUNK_UNCOMPRESSED => {
                    if body.len() < 4 {
                        return Err(ProtocolError::DecompressionFailure);
                    }
                    verify_checksum(&body[..4], &body[4..])?;
                    out.extend_from_slice(&body[4..]);
                }
                // reserved unskippable chunks
                0x02..=0x7f => return Err(ProtocolError::DecompressionFailure),
                // padding and reserved skippable chunks
                _ => {}
            }
        }
        Ok(())
    }
}
