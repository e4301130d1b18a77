//! Primitive field codecs: big-endian integers and length-prefixed strings.

use bytes::BufMut;

use crate::error::{EncodeError, EncodingError};

/// Longest byte string a 2-byte length prefix can describe.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Read a big-endian u16 at `offset`, or `None` if fewer than two bytes remain.
#[inline]
pub fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Encoded size of a length-prefixed field holding `bytes`.
pub fn prefixed_len(bytes: &[u8]) -> Result<usize, EncodeError> {
    if bytes.len() > MAX_STRING_LEN {
        return Err(EncodeError::StringTooLong(bytes.len()));
    }
    Ok(2 + bytes.len())
}

/// Write a 2-byte length prefix followed by `bytes`.
///
/// Callers size the packet with [`prefixed_len`] first, which rejects
/// anything that does not fit the prefix.
#[inline]
pub fn put_prefixed<B: BufMut>(buf: &mut B, bytes: &[u8]) {
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

/// Build a string from UTF-16 code units, pairing surrogates.
///
/// An unpaired high or low surrogate is `MalformedUnicode`.
pub fn string_from_utf16(units: &[u16]) -> Result<String, EncodingError> {
    char::decode_utf16(units.iter().copied())
        .map(|c| c.map_err(|_| EncodingError::MalformedUnicode))
        .collect()
}

/// Decode UTF-8 bytes received from the wire.
///
/// Bad lead bytes, bad continuation bytes, truncated and overlong sequences
/// are `MalformedUtf`. Encoded surrogate code points (U+D800..U+DFFF) are
/// `MalformedUnicode`.
pub fn decode_utf8(bytes: &[u8]) -> Result<String, EncodingError> {
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let lead = bytes[i];
        let (width, mut cp) = match lead {
            0x00..=0x7F => {
                out.push(lead as char);
                i += 1;
                continue;
            }
            0xC0..=0xDF => (2, (lead & 0x1F) as u32),
            0xE0..=0xEF => (3, (lead & 0x0F) as u32),
            0xF0..=0xF7 => (4, (lead & 0x07) as u32),
            _ => return Err(EncodingError::MalformedUtf),
        };

        let tail = bytes
            .get(i + 1..i + width)
            .ok_or(EncodingError::MalformedUtf)?;
        for &b in tail {
            if b & 0xC0 != 0x80 {
                return Err(EncodingError::MalformedUtf);
            }
            cp = (cp << 6) | (b & 0x3F) as u32;
        }

        let min = match width {
            2 => 0x80,
            3 => 0x800,
            _ => 0x10000,
        };
        if cp < min || cp > 0x10FFFF {
            return Err(EncodingError::MalformedUtf);
        }
        if (0xD800..=0xDFFF).contains(&cp) {
            return Err(EncodingError::MalformedUnicode);
        }

        out.push(char::from_u32(cp).ok_or(EncodingError::MalformedUtf)?);
        i += width;
    }

    Ok(out)
}
