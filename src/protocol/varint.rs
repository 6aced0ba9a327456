//! Variable-length integer encoding.
//!
//! ```text
//! 0    <= X < 240     : 1 byte   [ XXXX XXXX ]
//! 240  <= X < 2288    : 2 bytes  [ 1111 XXXX ] [ 0XXX XXXX ]
//! 2288 <= X < 264432  : 3 bytes  [ 1111 XXXX ] [ 1XXX XXXX ] [ 0XXX XXXX ]
//! ...
//! ```

use bytes::{Buf, BufMut};

use super::frame::FrameError;

/// Longest encoding of a u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Append `value` to `dst`.
pub fn encode(mut value: u64, dst: &mut impl BufMut) {
    if value < 240 {
        dst.put_u8(value as u8);
        return;
    }

    dst.put_u8((value as u8) | 0xF0);
    value = (value - 240) >> 4;
    while value >= 128 {
        dst.put_u8((value as u8) | 0x80);
        value = (value - 128) >> 7;
    }
    dst.put_u8(value as u8);
}

/// Read one varint from the front of `src`.
pub fn decode(src: &mut impl Buf) -> Result<u64, FrameError> {
    if !src.has_remaining() {
        return Err(FrameError::Truncated("varint"));
    }

    let first = src.get_u8();
    if first < 240 {
        return Ok(first as u64);
    }

    let mut value = first as u128;
    let mut shift = 4u32;
    for _ in 1..MAX_VARINT_LEN {
        if !src.has_remaining() {
            return Err(FrameError::Truncated("varint"));
        }
        let byte = src.get_u8();
        value += (byte as u128) << shift;
        if value > u64::MAX as u128 {
            return Err(FrameError::VarintOverflow);
        }
        if byte < 128 {
            return Ok(value as u64);
        }
        shift += 7;
    }

    Err(FrameError::VarintOverflow)
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len(mut value: u64) -> usize {
    if value < 240 {
        return 1;
    }
    let mut len = 2;
    value = (value - 240) >> 4;
    while value >= 128 {
        len += 1;
        value = (value - 128) >> 7;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(value: u64) -> (u64, usize) {
        let mut buf = BytesMut::new();
        encode(value, &mut buf);
        let len = buf.len();
        let mut src = buf.freeze();
        (decode(&mut src).unwrap(), len)
    }

    #[test]
    fn boundaries_use_expected_widths() {
        assert_eq!(roundtrip(0), (0, 1));
        assert_eq!(roundtrip(239), (239, 1));
        assert_eq!(roundtrip(240), (240, 2));
        assert_eq!(roundtrip(2287), (2287, 2));
        assert_eq!(roundtrip(2288), (2288, 3));
        assert_eq!(roundtrip(264_431), (264_431, 3));
        assert_eq!(roundtrip(264_432), (264_432, 4));
    }

    #[test]
    fn known_encoding() {
        // 1234 → 0xF2 0x3E
        let mut buf = BytesMut::new();
        encode(1234, &mut buf);
        assert_eq!(&buf[..], &[0xF2, 0x3E]);
    }

    #[test]
    fn u64_max_fits() {
        let (value, len) = roundtrip(u64::MAX);
        assert_eq!(value, u64::MAX);
        assert_eq!(len, encoded_len(u64::MAX));
        assert!(len <= MAX_VARINT_LEN);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let mut src: &[u8] = &[0xF2];
        assert!(matches!(decode(&mut src), Err(FrameError::Truncated(_))));

        let mut empty: &[u8] = &[];
        assert!(matches!(decode(&mut empty), Err(FrameError::Truncated(_))));
    }

    #[test]
    fn endless_continuation_is_rejected() {
        let mut src: &[u8] = &[0xFF; 16];
        assert!(decode(&mut src).is_err());
    }
}
