//! Typed values carried inside frames.
//!
//! # Wire Layout
//! ```text
//! [ flags:4 | tag:4 ] [ data ... ]
//! ```
//! Integers are varints, addresses are raw network-order bytes, strings and
//! binaries are a varint length followed by the bytes.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes};

use super::frame::FrameError;
use super::varint;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT32: u8 = 2;
const TAG_UINT32: u8 = 3;
const TAG_INT64: u8 = 4;
const TAG_UINT64: u8 = 5;
const TAG_IPV4: u8 = 6;
const TAG_IPV6: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_BINARY: u8 = 9;

const TAG_MASK: u8 = 0x0F;
const FLAG_TRUE: u8 = 0x10;

/// A single typed value.
///
/// Each variant encodes with exactly its own tag; there is no widening
/// between integer kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedValue {
    Null,
    Bool(bool),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    String(String),
    Binary(Bytes),
}

impl TypedValue {
    /// Human-readable kind, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            TypedValue::Null => "null",
            TypedValue::Bool(_) => "bool",
            TypedValue::Int32(_) => "int32",
            TypedValue::Uint32(_) => "uint32",
            TypedValue::Int64(_) => "int64",
            TypedValue::Uint64(_) => "uint64",
            TypedValue::Ipv4(_) => "ipv4",
            TypedValue::Ipv6(_) => "ipv6",
            TypedValue::String(_) => "string",
            TypedValue::Binary(_) => "binary",
        }
    }

    /// Borrow as a string slice, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow raw bytes of a string or binary value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            TypedValue::String(s) => Some(s.as_bytes()),
            TypedValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Any integer kind as i64, if it fits.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            TypedValue::Int32(v) => Some(v as i64),
            TypedValue::Uint32(v) => Some(v as i64),
            TypedValue::Int64(v) => Some(v),
            TypedValue::Uint64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            TypedValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Append the encoded value to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        match self {
            TypedValue::Null => dst.put_u8(TAG_NULL),
            TypedValue::Bool(v) => dst.put_u8(TAG_BOOL | if *v { FLAG_TRUE } else { 0 }),
            TypedValue::Int32(v) => {
                dst.put_u8(TAG_INT32);
                varint::encode(*v as i64 as u64, dst);
            }
            TypedValue::Uint32(v) => {
                dst.put_u8(TAG_UINT32);
                varint::encode(*v as u64, dst);
            }
            TypedValue::Int64(v) => {
                dst.put_u8(TAG_INT64);
                varint::encode(*v as u64, dst);
            }
            TypedValue::Uint64(v) => {
                dst.put_u8(TAG_UINT64);
                varint::encode(*v, dst);
            }
            TypedValue::Ipv4(addr) => {
                dst.put_u8(TAG_IPV4);
                dst.put_slice(&addr.octets());
            }
            TypedValue::Ipv6(addr) => {
                dst.put_u8(TAG_IPV6);
                dst.put_slice(&addr.octets());
            }
            TypedValue::String(s) => {
                dst.put_u8(TAG_STRING);
                put_bytes(s.as_bytes(), dst);
            }
            TypedValue::Binary(b) => {
                dst.put_u8(TAG_BINARY);
                put_bytes(b, dst);
            }
        }
    }

    /// Read one value from the front of `src`.
    pub fn decode(src: &mut Bytes) -> Result<Self, FrameError> {
        if !src.has_remaining() {
            return Err(FrameError::Truncated("value type"));
        }
        let type_byte = src.get_u8();

        let value = match type_byte & TAG_MASK {
            TAG_NULL => TypedValue::Null,
            TAG_BOOL => TypedValue::Bool(type_byte & FLAG_TRUE != 0),
            TAG_INT32 => {
                let v = varint::decode(src)? as i64;
                TypedValue::Int32(i32::try_from(v).map_err(|_| FrameError::VarintOverflow)?)
            }
            TAG_UINT32 => {
                let v = varint::decode(src)?;
                TypedValue::Uint32(u32::try_from(v).map_err(|_| FrameError::VarintOverflow)?)
            }
            TAG_INT64 => TypedValue::Int64(varint::decode(src)? as i64),
            TAG_UINT64 => TypedValue::Uint64(varint::decode(src)?),
            TAG_IPV4 => {
                let octets: [u8; 4] = take_array(src, "ipv4")?;
                TypedValue::Ipv4(Ipv4Addr::from(octets))
            }
            TAG_IPV6 => {
                let octets: [u8; 16] = take_array(src, "ipv6")?;
                TypedValue::Ipv6(Ipv6Addr::from(octets))
            }
            TAG_STRING => TypedValue::String(decode_string(src)?),
            TAG_BINARY => TypedValue::Binary(take_bytes(src, "binary")?),
            other => return Err(FrameError::UnknownValueType(other)),
        };

        Ok(value)
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Null => write!(f, "null"),
            TypedValue::Bool(v) => write!(f, "{}", v),
            TypedValue::Int32(v) => write!(f, "{}", v),
            TypedValue::Uint32(v) => write!(f, "{}", v),
            TypedValue::Int64(v) => write!(f, "{}", v),
            TypedValue::Uint64(v) => write!(f, "{}", v),
            TypedValue::Ipv4(v) => write!(f, "{}", v),
            TypedValue::Ipv6(v) => write!(f, "{}", v),
            TypedValue::String(v) => write!(f, "{}", v),
            TypedValue::Binary(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        TypedValue::String(value.to_string())
    }
}

impl From<String> for TypedValue {
    fn from(value: String) -> Self {
        TypedValue::String(value)
    }
}

/// Length-prefixed byte string.
pub(crate) fn put_bytes(bytes: &[u8], dst: &mut impl BufMut) {
    varint::encode(bytes.len() as u64, dst);
    dst.put_slice(bytes);
}

/// Read a length-prefixed byte string without copying.
pub(crate) fn take_bytes(src: &mut Bytes, what: &'static str) -> Result<Bytes, FrameError> {
    let len = varint::decode(src)?;
    let len = usize::try_from(len).map_err(|_| FrameError::Truncated(what))?;
    if src.remaining() < len {
        return Err(FrameError::Truncated(what));
    }
    Ok(src.split_to(len))
}

/// Read a length-prefixed UTF-8 string.
pub(crate) fn decode_string(src: &mut Bytes) -> Result<String, FrameError> {
    let raw = take_bytes(src, "string")?;
    String::from_utf8(raw.to_vec()).map_err(|_| FrameError::InvalidUtf8)
}

fn take_array<const N: usize>(src: &mut Bytes, what: &'static str) -> Result<[u8; N], FrameError> {
    if src.remaining() < N {
        return Err(FrameError::Truncated(what));
    }
    let mut out = [0u8; N];
    src.copy_to_slice(&mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encode(value: &TypedValue) -> Bytes {
        let mut buf = BytesMut::new();
        value.encode(&mut buf);
        buf.freeze()
    }

    #[test]
    fn every_kind_keeps_its_tag() {
        let values = vec![
            TypedValue::Null,
            TypedValue::Bool(true),
            TypedValue::Bool(false),
            TypedValue::Int32(-7),
            TypedValue::Uint32(7),
            TypedValue::Int64(i64::MIN),
            TypedValue::Uint64(u64::MAX),
            TypedValue::Ipv4(Ipv4Addr::new(10, 0, 0, 1)),
            TypedValue::Ipv6(Ipv6Addr::LOCALHOST),
            TypedValue::String("GET".into()),
            TypedValue::Binary(Bytes::from_static(b"\x00\x01")),
        ];

        for value in values {
            let mut bytes = encode(&value);
            let decoded = TypedValue::decode(&mut bytes).unwrap();
            assert_eq!(decoded, value, "kind {}", value.kind());
            assert!(bytes.is_empty());
        }
    }

    #[test]
    fn bool_flag_lives_in_high_nibble() {
        assert_eq!(&encode(&TypedValue::Bool(true))[..], &[0x11]);
        assert_eq!(&encode(&TypedValue::Bool(false))[..], &[0x01]);
    }

    #[test]
    fn string_layout() {
        assert_eq!(&encode(&TypedValue::from("ab"))[..], &[0x08, 0x02, b'a', b'b']);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = Bytes::from_static(&[0x0A, 0x00]);
        assert!(matches!(
            TypedValue::decode(&mut bytes),
            Err(FrameError::UnknownValueType(10))
        ));
    }

    #[test]
    fn short_string_is_truncated() {
        let mut bytes = Bytes::from_static(&[0x08, 0x05, b'a']);
        assert!(matches!(
            TypedValue::decode(&mut bytes),
            Err(FrameError::Truncated(_))
        ));
    }

    #[test]
    fn invalid_utf8_string_is_rejected() {
        let mut bytes = Bytes::from_static(&[0x08, 0x01, 0xFF]);
        assert!(matches!(TypedValue::decode(&mut bytes), Err(FrameError::InvalidUtf8)));
    }

    #[test]
    fn uint32_overflow_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(TAG_UINT32);
        varint::encode(u32::MAX as u64 + 1, &mut buf);
        let mut bytes = buf.freeze();
        assert!(TypedValue::decode(&mut bytes).is_err());
    }

    #[test]
    fn int32_out_of_range_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(TAG_INT32);
        varint::encode(1 << 33, &mut buf);
        let mut bytes = buf.freeze();
        assert!(matches!(
            TypedValue::decode(&mut bytes),
            Err(FrameError::VarintOverflow)
        ));
    }
}
