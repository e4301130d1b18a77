//! Growable receive buffer with cheap front consumption.

use bytes::{Buf, Bytes, BytesMut};

use crate::codec;
use crate::error::{ProtocolError, Result};

const DEFAULT_CAPACITY: usize = 4096;

/// Accumulates transport chunks until whole packets can be decoded.
///
/// Offsets passed to the read methods are relative to the front of the
/// unconsumed data. Reads never mutate; only `append`, `consume` and
/// `clear` do.
#[derive(Debug)]
pub struct ByteAccumulator {
    buf: BytesMut,
}

impl Default for ByteAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteAccumulator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Append a chunk to the end of the buffer.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Drop the first `n` bytes.
    pub fn consume(&mut self, n: usize) -> Result<()> {
        self.check(0, n)?;
        self.buf.advance(n);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discard everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Unconsumed bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        self.check(offset, 1)?;
        Ok(self.buf[offset])
    }

    pub fn read_u16_be(&self, offset: usize) -> Result<u16> {
        codec::read_u16(&self.buf, offset).ok_or(ProtocolError::OutOfBounds {
            offset,
            len: 2,
            available: self.buf.len(),
        })
    }

    /// Copy `start..end` out of the buffer.
    ///
    /// The returned bytes stay valid after the region is consumed.
    pub fn slice(&self, start: usize, end: usize) -> Result<Bytes> {
        let len = end.checked_sub(start).ok_or(ProtocolError::OutOfBounds {
            offset: start,
            len: 0,
            available: self.buf.len(),
        })?;
        self.check(start, len)?;
        Ok(Bytes::copy_from_slice(&self.buf[start..end]))
    }

    /// Decode `len` bytes at `offset` as UTF-8.
    pub fn decode_utf8(&self, offset: usize, len: usize) -> Result<String> {
        self.check(offset, len)?;
        Ok(codec::decode_utf8(&self.buf[offset..offset + len])?)
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.buf.len() => Ok(()),
            _ => Err(ProtocolError::OutOfBounds {
                offset,
                len,
                available: self.buf.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EncodingError;

    #[test]
    fn test_append_and_consume() {
        let mut acc = ByteAccumulator::new();
        acc.append(&[1, 2, 3]);
        acc.append(&[4, 5]);
        assert_eq!(acc.len(), 5);
        assert_eq!(acc.as_slice(), &[1, 2, 3, 4, 5]);

        acc.consume(2).unwrap();
        assert_eq!(acc.as_slice(), &[3, 4, 5]);
        assert_eq!(acc.read_u8(0).unwrap(), 3);

        acc.consume(3).unwrap();
        assert!(acc.is_empty());
    }

    #[test]
    fn test_consume_past_end() {
        let mut acc = ByteAccumulator::new();
        acc.append(&[1, 2]);
        assert!(matches!(
            acc.consume(3),
            Err(ProtocolError::OutOfBounds { available: 2, .. })
        ));
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn test_reads_out_of_bounds() {
        let mut acc = ByteAccumulator::new();
        acc.append(&[0x01, 0x02, 0x03]);
        assert_eq!(acc.read_u16_be(1).unwrap(), 0x0203);
        assert!(acc.read_u16_be(2).is_err());
        assert!(acc.read_u8(3).is_err());
        assert!(acc.slice(2, 4).is_err());
        assert!(acc.slice(2, 1).is_err());
    }

    #[test]
    fn test_slice_is_independent() {
        let mut acc = ByteAccumulator::new();
        acc.append(b"hello world");
        let word = acc.slice(6, 11).unwrap();
        acc.consume(11).unwrap();
        acc.append(b"XXXXX");
        assert_eq!(&word[..], b"world");
    }

    #[test]
    fn test_decode_utf8() {
        let mut acc = ByteAccumulator::new();
        acc.append(&[0x00, 0x02]);
        acc.append("\u{e9}".as_bytes());
        assert_eq!(acc.decode_utf8(2, 2).unwrap(), "\u{e9}");
        assert!(acc.decode_utf8(2, 3).is_err());

        acc.clear();
        acc.append(&[0xC3, 0x28]);
        assert_eq!(
            acc.decode_utf8(0, 2),
            Err(ProtocolError::Encoding(EncodingError::MalformedUtf))
        );
    }
}
