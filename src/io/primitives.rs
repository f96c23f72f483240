//! Length-prefixed reads and big/little-endian integer codecs.

use thiserror::Error;

/// Errors produced while decoding a byte slice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The input ended before the requested number of bytes.
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },
}

/// A forward-only cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! read_int {
    ($name:ident, $ty:ty, $conv:ident) => {
        pub fn $name(&mut self) -> Result<$ty, DecodeError> {
            let bytes = self.read_array::<{ std::mem::size_of::<$ty>() }>()?;
            Ok(<$ty>::$conv(bytes))
        }
    };
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Offset of the cursor from the start of the input.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The unread tail of the input.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::UnexpectedEnd {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.read_bytes(n).map(|_| ())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    read_int!(read_u16_be, u16, from_be_bytes);
    read_int!(read_u32_be, u32, from_be_bytes);
    read_int!(read_u64_be, u64, from_be_bytes);
    read_int!(read_u16_le, u16, from_le_bytes);
    read_int!(read_u32_le, u32, from_le_bytes);
    read_int!(read_u64_le, u64, from_le_bytes);

    /// 24-bit big-endian integer, as used by TLS handshake headers.
    pub fn read_u24_be(&mut self) -> Result<u32, DecodeError> {
        let [a, b, c] = self.read_array::<3>()?;
        Ok(u32::from_be_bytes([0, a, b, c]))
    }

    /// Byte string prefixed by a one-byte length.
    pub fn read_vec_u8(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u8()? as usize;
        self.read_bytes(len)
    }

    /// Byte string prefixed by a two-byte big-endian length.
    pub fn read_vec_u16(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u16_be()? as usize;
        self.read_bytes(len)
    }

    /// Byte string prefixed by a three-byte big-endian length.
    pub fn read_vec_u24(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u24_be()? as usize;
        self.read_bytes(len)
    }
}

pub fn put_u16_be(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u24_be(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes()[1..]);
}

pub fn put_u32_be(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u64_be(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u16_le(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn put_u32_le(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn put_u64_le(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_mixed_endianness() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_u16_be().unwrap(), 0x0102);
        assert_eq!(r.read_u16_le().unwrap(), 0x0403);
        assert_eq!(r.read_u24_be().unwrap(), 0x050607);
        assert!(r.is_empty());
    }

    #[test]
    fn length_prefixed_reads() {
        let data = [0x02, b'h', b'i', 0x00, 0x03, b'a', b'b', b'c'];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_vec_u8().unwrap(), b"hi");
        assert_eq!(r.read_vec_u16().unwrap(), b"abc");
        assert_eq!(r.position(), data.len());
    }

    #[test]
    fn short_input_is_an_error() {
        let data = [0x00, 0x05, b'a'];
        let mut r = ByteReader::new(&data);
        assert_eq!(
            r.read_vec_u16(),
            Err(DecodeError::UnexpectedEnd { needed: 5, remaining: 1 })
        );
    }

    #[test]
    fn encoders_match_decoders() {
        let mut out = Vec::new();
        put_u24_be(&mut out, 0x00ABCDEF);
        put_u64_le(&mut out, 42);
        put_u32_be(&mut out, 7);
        let mut r = ByteReader::new(&out);
        assert_eq!(r.read_u24_be().unwrap(), 0xABCDEF);
        assert_eq!(r.read_u64_le().unwrap(), 42);
        assert_eq!(r.read_u32_be().unwrap(), 7);
    }
}
