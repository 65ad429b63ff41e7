//! # Wire Buffers
//!
//! Typed encoding primitives over a growable byte buffer.
//!
//! ## Numeric Encodings
//! - Fixed-width integers and floats are written big-endian.
//! - Compressed integers use zig-zag mapping followed by LEB128 groups of 7 bits,
//!   so small magnitudes (positive or negative) take fewer bytes.
//!
//! Which form a field uses is decided by its marshaller; nothing on the wire
//! says which one was picked.
//!
//! ## Composite Encodings
//! ```text
//! string : [compressed i32 byte length][UTF-8 bytes]
//! bytes  : [compressed i32 length][bytes]
//! bitset : [compressed i32 bit count][ceil(n / 8) bytes, LSB first]
//! bool   : [0x00 | 0x01]
//! ```
//!
//! Every read is bounds checked. Running out of input yields
//! [`ProtocolError::Incomplete`] and never a partially decoded value.

use crate::error::{ProtocolError, Result};
use bytes::{BufMut, BytesMut};

/// Maximum encoded length of a compressed 32-bit integer
pub const MAX_COMPRESSED_I32_LEN: usize = 5;

/// Maximum encoded length of a compressed 64-bit integer
pub const MAX_COMPRESSED_I64_LEN: usize = 10;

#[inline]
fn zigzag_encode_32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

#[inline]
fn zigzag_decode_32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

#[inline]
fn zigzag_encode_64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
fn zigzag_decode_64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Write side of the wire format.
pub struct Encoder<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    /// Number of bytes written into the underlying buffer so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop everything written after `len`, used to undo a failed encode
    pub(crate) fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    pub fn write_compressed_i32(&mut self, value: i32) {
        let mut remaining = zigzag_encode_32(value);
        while remaining >= 0x80 {
            self.buf.put_u8((remaining as u8 & 0x7F) | 0x80);
            remaining >>= 7;
        }
        self.buf.put_u8(remaining as u8);
    }

    pub fn write_compressed_i64(&mut self, value: i64) {
        let mut remaining = zigzag_encode_64(value);
        while remaining >= 0x80 {
            self.buf.put_u8((remaining as u8 & 0x7F) | 0x80);
            remaining >>= 7;
        }
        self.buf.put_u8(remaining as u8);
    }

    /// Length-prefixed UTF-8
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_length(value.len())?;
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    /// Length-prefixed byte array
    pub fn write_byte_array(&mut self, value: &[u8]) -> Result<()> {
        self.write_length(value.len())?;
        self.buf.put_slice(value);
        Ok(())
    }

    /// Packed bit-set
    pub fn write_bitset(&mut self, bits: &[bool]) -> Result<()> {
        self.write_length(bits.len())?;
        for chunk in bits.chunks(8) {
            let byte = chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, set)| if *set { acc | (1 << i) } else { acc });
            self.buf.put_u8(byte);
        }
        Ok(())
    }

    /// Raw bytes copied verbatim, no length prefix
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    fn write_length(&mut self, len: usize) -> Result<()> {
        let len = i32::try_from(len).map_err(|_| ProtocolError::OversizedFrame(len))?;
        self.write_compressed_i32(len);
        Ok(())
    }
}

/// Read side of the wire format.
///
/// Keeps its own read position so lookahead can be undone.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn set_position(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::Incomplete);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    pub fn read_compressed_i32(&mut self) -> Result<i32> {
        let mut result: u32 = 0;
        for i in 0..MAX_COMPRESSED_I32_LEN {
            let byte = self.read_u8()?;
            if i == MAX_COMPRESSED_I32_LEN - 1 && byte & 0x70 != 0 {
                return Err(ProtocolError::UnexpectedValue {
                    expected: "compressed i32",
                    found: "bits beyond 32",
                });
            }
            result |= u32::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(zigzag_decode_32(result));
            }
        }
        Err(ProtocolError::UnexpectedValue {
            expected: "compressed i32",
            found: "overlong varint",
        })
    }

    pub fn read_compressed_i64(&mut self) -> Result<i64> {
        let mut result: u64 = 0;
        for i in 0..MAX_COMPRESSED_I64_LEN {
            let byte = self.read_u8()?;
            if i == MAX_COMPRESSED_I64_LEN - 1 && byte & 0x7E != 0 {
                return Err(ProtocolError::UnexpectedValue {
                    expected: "compressed i64",
                    found: "bits beyond 64",
                });
            }
            result |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(zigzag_decode_64(result));
            }
        }
        Err(ProtocolError::UnexpectedValue {
            expected: "compressed i64",
            found: "overlong varint",
        })
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_length()?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    pub fn read_byte_array(&mut self) -> Result<Vec<u8>> {
        let len = self.read_length()?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_bitset(&mut self) -> Result<Vec<bool>> {
        let bits = self.read_length()?;
        let packed = self.take(bits.div_ceil(8))?;
        Ok((0..bits)
            .map(|i| packed[i / 8] & (1 << (i % 8)) != 0)
            .collect())
    }

    /// Borrow the next `len` bytes verbatim
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    fn read_length(&mut self) -> Result<usize> {
        let len = self.read_compressed_i32()?;
        usize::try_from(len).map_err(|_| ProtocolError::UnexpectedValue {
            expected: "non-negative length",
            found: "negative length",
        })
    }
}
