//! Hello negotiation.
//!
//! The proxy announces what it supports; the agent answers with the
//! common subset or refuses with a disconnect status.

use thiserror::Error;

use crate::protocol::{
    DisconnectStatus, Frame, FrameType, KvList, TypedValue, MIN_FRAME_SIZE, SUPPORTED_CAPABILITIES,
    SUPPORTED_VERSIONS,
};

pub const KEY_SUPPORTED_VERSIONS: &str = "supported-versions";
pub const KEY_VERSION: &str = "version";
pub const KEY_MAX_FRAME_SIZE: &str = "max-frame-size";
pub const KEY_CAPABILITIES: &str = "capabilities";
pub const KEY_HEALTHCHECK: &str = "healthcheck";
pub const KEY_ENGINE_ID: &str = "engine-id";

/// Why a hello was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("expected hello, got {0}")]
    NotHello(&'static str),

    #[error("hello has no supported-versions")]
    NoVersion,

    #[error("no common version in '{0}'")]
    BadVersion(String),

    #[error("hello has no max-frame-size")]
    NoFrameSize,

    #[error("max-frame-size {0} too small")]
    BadFrameSize(i64),

    #[error("hello has no capabilities")]
    NoCapabilities,
}

impl HandshakeError {
    pub fn status(&self) -> DisconnectStatus {
        match self {
            HandshakeError::NotHello(_) => DisconnectStatus::InvalidFrame,
            HandshakeError::NoVersion => DisconnectStatus::NoVersion,
            HandshakeError::BadVersion(_) => DisconnectStatus::BadVersion,
            HandshakeError::NoFrameSize => DisconnectStatus::NoFrameSize,
            HandshakeError::BadFrameSize(_) => DisconnectStatus::BadFrameSize,
            HandshakeError::NoCapabilities => DisconnectStatus::NoCapabilities,
        }
    }
}

/// Outcome of a successful hello exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedParams {
    pub version: String,
    pub max_frame_size: u32,
    pub capabilities: Vec<String>,
    /// The proxy only wants to know we are alive.
    pub healthcheck: bool,
    pub engine_id: Option<String>,
}

impl NegotiatedParams {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// The agent-hello reply announcing these parameters.
    pub fn agent_hello(&self) -> Frame {
        Frame::agent_hello(
            KvList::new()
                .with(KEY_VERSION, self.version.as_str())
                .with(KEY_MAX_FRAME_SIZE, TypedValue::Uint32(self.max_frame_size))
                .with(KEY_CAPABILITIES, self.capabilities.join(",")),
        )
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Negotiate against the proxy's hello frame.
pub fn negotiate(frame: &Frame, agent_max_frame_size: u32) -> Result<NegotiatedParams, HandshakeError> {
    if frame.kind != FrameType::Hello {
        return Err(HandshakeError::NotHello(frame.kind.as_str()));
    }
    let items = frame
        .kv_list()
        .ok_or(HandshakeError::NotHello(frame.kind.as_str()))?;

    let versions = items
        .get(KEY_SUPPORTED_VERSIONS)
        .and_then(TypedValue::as_str)
        .ok_or(HandshakeError::NoVersion)?;
    let version = SUPPORTED_VERSIONS
        .iter()
        .find(|ours| split_list(versions).any(|theirs| theirs == **ours))
        .ok_or_else(|| HandshakeError::BadVersion(versions.to_string()))?;

    let proxy_size = items
        .get(KEY_MAX_FRAME_SIZE)
        .and_then(TypedValue::as_i64)
        .ok_or(HandshakeError::NoFrameSize)?;
    let max_frame_size = proxy_size.clamp(0, i64::from(agent_max_frame_size)) as u32;
    if max_frame_size < MIN_FRAME_SIZE {
        return Err(HandshakeError::BadFrameSize(proxy_size));
    }

    let offered = items
        .get(KEY_CAPABILITIES)
        .and_then(TypedValue::as_str)
        .ok_or(HandshakeError::NoCapabilities)?;
    let capabilities = split_list(offered)
        .filter(|c| SUPPORTED_CAPABILITIES.contains(c))
        .map(str::to_string)
        .collect();

    Ok(NegotiatedParams {
        version: version.to_string(),
        max_frame_size,
        capabilities,
        healthcheck: items
            .get(KEY_HEALTHCHECK)
            .and_then(TypedValue::as_bool)
            .unwrap_or(false),
        engine_id: items
            .get(KEY_ENGINE_ID)
            .and_then(TypedValue::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameFlags, Payload};

    fn hello(items: KvList) -> Frame {
        Frame {
            kind: FrameType::Hello,
            flags: FrameFlags::FIN,
            stream_id: 0,
            frame_id: 0,
            payload: Payload::KvList(items),
        }
    }

    fn proxy_hello(size: u32) -> KvList {
        KvList::new()
            .with(KEY_SUPPORTED_VERSIONS, "1.0, 2.0")
            .with(KEY_MAX_FRAME_SIZE, TypedValue::Uint32(size))
            .with(KEY_CAPABILITIES, "pipelining,fragmentation,async")
            .with(KEY_ENGINE_ID, "e1")
    }

    #[test]
    fn negotiates_common_subset() {
        let params = negotiate(&hello(proxy_hello(65_536)), 16_384).unwrap();
        assert_eq!(params.version, "2.0");
        assert_eq!(params.max_frame_size, 16_384);
        assert_eq!(params.capabilities, vec!["pipelining", "async"]);
        assert!(params.supports("async"));
        assert!(!params.supports("fragmentation"));
        assert!(!params.healthcheck);
        assert_eq!(params.engine_id.as_deref(), Some("e1"));

        let reply = params.agent_hello();
        assert_eq!(reply.kind, FrameType::AgentHello);
        let items = reply.kv_list().unwrap();
        assert_eq!(items.get(KEY_VERSION), Some(&TypedValue::from("2.0")));
        assert_eq!(items.get(KEY_MAX_FRAME_SIZE), Some(&TypedValue::Uint32(16_384)));
        assert_eq!(items.get(KEY_CAPABILITIES), Some(&TypedValue::from("pipelining,async")));
    }

    #[test]
    fn smaller_proxy_frame_size_wins() {
        let params = negotiate(&hello(proxy_hello(1_024)), 16_384).unwrap();
        assert_eq!(params.max_frame_size, 1_024);
    }

    #[test]
    fn refusals_map_to_status_codes() {
        let no_version = KvList::new().with(KEY_MAX_FRAME_SIZE, TypedValue::Uint32(1024));
        let err = negotiate(&hello(no_version), 16_384).unwrap_err();
        assert_eq!(err.status(), DisconnectStatus::NoVersion);

        let bad_version = KvList::new()
            .with(KEY_SUPPORTED_VERSIONS, "1.0")
            .with(KEY_MAX_FRAME_SIZE, TypedValue::Uint32(1024))
            .with(KEY_CAPABILITIES, "");
        let err = negotiate(&hello(bad_version), 16_384).unwrap_err();
        assert_eq!(err.status(), DisconnectStatus::BadVersion);

        let err = negotiate(&hello(proxy_hello(100)), 16_384).unwrap_err();
        assert_eq!(err, HandshakeError::BadFrameSize(100));
        assert_eq!(err.status().code(), 9);

        let no_caps = KvList::new()
            .with(KEY_SUPPORTED_VERSIONS, "2.0")
            .with(KEY_MAX_FRAME_SIZE, TypedValue::Uint32(1024));
        let err = negotiate(&hello(no_caps), 16_384).unwrap_err();
        assert_eq!(err.status(), DisconnectStatus::NoCapabilities);
    }

    #[test]
    fn healthcheck_flag_is_read() {
        let items = proxy_hello(16_384).with(KEY_HEALTHCHECK, TypedValue::Bool(true));
        assert!(negotiate(&hello(items), 16_384).unwrap().healthcheck);
    }

    #[test]
    fn notify_instead_of_hello_is_invalid() {
        let err = negotiate(&Frame::notify(1, 1, vec![]), 16_384).unwrap_err();
        assert_eq!(err.status(), DisconnectStatus::InvalidFrame);
    }
}
