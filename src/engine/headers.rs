//! HTTP header blocks as sent by the proxy.
//!
//! The proxy serializes headers as consecutive `<varint len><name>`
//! `<varint len><value>` pairs, terminated by an empty name and value.

use bytes::Bytes;

use crate::protocol::value::take_bytes;
use crate::protocol::FrameError;

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    entries: Vec<(String, String)>,
}

impl HeaderBlock {
    /// Parse a serialized header block.
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        let mut src = Bytes::copy_from_slice(raw);
        let mut entries = Vec::new();

        while !src.is_empty() {
            let name = take_bytes(&mut src, "header name")?;
            let value = take_bytes(&mut src, "header value")?;
            if name.is_empty() && value.is_empty() {
                break;
            }
            entries.push((
                String::from_utf8_lossy(&name).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            ));
        }

        Ok(Self { entries })
    }

    /// Serialize back into wire form, with terminator.
    pub fn encode(&self) -> Bytes {
        let mut buf = bytes::BytesMut::new();
        for (name, value) in &self.entries {
            crate::protocol::value::put_bytes(name.as_bytes(), &mut buf);
            crate::protocol::value::put_bytes(value.as_bytes(), &mut buf);
        }
        crate::protocol::value::put_bytes(&[], &mut buf);
        crate::protocol::value::put_bytes(&[], &mut buf);
        buf.freeze()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in arrival order.
    pub fn values(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Number of headers named `name`.
    pub fn count(&self, name: &str) -> usize {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
