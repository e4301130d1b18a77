//! Remaining-length encoding.
//!
//! The fixed header carries the size of the rest of the packet as a
//! variable-length integer: 7 value bits per byte, least significant group
//! first, with the high bit set when another byte follows. At most four
//! bytes are allowed:
//! - 0-127: 1 byte
//! - 128-16383: 2 bytes
//! - 16384-2097151: 3 bytes
//! - 2097152-268435455: 4 bytes

use bytes::BufMut;

use crate::error::{EncodeError, ProtocolError, Result};

/// Largest value a four byte remaining length can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Maximum number of bytes in an encoded remaining length.
pub const MAX_ENCODED_LEN: usize = 4;

/// Decode a remaining length from the front of `buf`.
///
/// Returns `Ok(Some((value, bytes_consumed)))` once the terminating byte is
/// seen, `Ok(None)` if `buf` ends before it, or `Err` if the fourth byte
/// still has its continuation bit set.
///
/// # Example
/// ```
/// use mqwire_core::varint::decode;
/// let buf = [0x80, 0x80, 0x01];
/// assert_eq!(decode(&buf).unwrap(), Some((16384, 3)));
/// ```
pub fn decode(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;

    for (i, &byte) in buf.iter().take(MAX_ENCODED_LEN).enumerate() {
        value += ((byte & 0x7F) as usize) << (7 * i);

        if (byte & 0x80) == 0 {
            return Ok(Some((value, i + 1)));
        }

        if i == MAX_ENCODED_LEN - 1 {
            return Err(ProtocolError::InvalidRemainingLength);
        }
    }

    Ok(None)
}

/// Append the minimal encoding of `value` to `buf`.
///
/// Returns the number of bytes written.
///
/// # Example
/// ```
/// use mqwire_core::varint::encode;
/// let mut buf = Vec::new();
/// assert_eq!(encode(300, &mut buf).unwrap(), 2);
/// assert_eq!(&buf, &[0xAC, 0x02]);
/// ```
pub fn encode<B: BufMut>(mut value: usize, buf: &mut B) -> std::result::Result<usize, EncodeError> {
    if value > MAX_REMAINING_LENGTH {
        return Err(EncodeError::PacketTooLarge(value));
    }

    let mut written = 0;
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        written += 1;
        if value == 0 {
            break;
        }
    }
    Ok(written)
}

/// Number of bytes needed to encode `value`.
///
/// # Example
/// ```
/// use mqwire_core::varint::encoded_len;
/// assert_eq!(encoded_len(127), 1);
/// assert_eq!(encoded_len(16384), 3);
/// ```
pub fn encoded_len(mut value: usize) -> usize {
    let mut len = 0;
    loop {
        len += 1;
        value /= 128;
        if value == 0 {
            break;
        }
    }
    len
}
