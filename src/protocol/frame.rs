//! Frame model and body encoding.
//!
//! # Frame Body
//! ```text
//! ┌──────┬───────────┬────────────┬───────────┬──────────────────┐
//! │ Type │ Flags     │ Stream ID  │ Frame ID  │ Payload          │
//! │ 1 B  │ 4 B (BE)  │ varint     │ varint    │ type-specific    │
//! └──────┴───────────┴────────────┴───────────┴──────────────────┘
//! ```
//! The 4-byte length prefix in front of the body is handled by `codec`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::status::DisconnectStatus;
use super::value::{decode_string, put_bytes, TypedValue};
use super::varint;

/// Errors raised while decoding or encoding frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {size} bytes exceeds maximum of {max}")]
    TooLarge { size: usize, max: usize },

    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),

    #[error("unknown value type {0}")]
    UnknownValueType(u8),

    #[error("unknown action type {0}")]
    UnknownActionType(u8),

    #[error("unknown variable scope {0}")]
    UnknownScope(u8),

    #[error("truncated frame while reading {0}")]
    Truncated(&'static str),

    #[error("varint overflows 64 bits")]
    VarintOverflow,

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed {0}")]
    Malformed(&'static str),

    #[error("{kind:?} frame cannot carry a {payload} payload")]
    PayloadMismatch { kind: FrameType, payload: &'static str },

    #[error("{0} has more than 255 arguments")]
    TooManyArguments(String),
}

impl FrameError {
    /// Status code reported to the peer when this error ends a connection.
    pub fn status(&self) -> DisconnectStatus {
        match self {
            FrameError::TooLarge { .. } => DisconnectStatus::FrameTooBig,
            _ => DisconnectStatus::InvalidFrame,
        }
    }
}

/// Frame kinds defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Hello,
    Disconnect,
    Notify,
    AgentHello,
    AgentDisconnect,
    Ack,
}

impl FrameType {
    pub fn code(self) -> u8 {
        match self {
            FrameType::Hello => 1,
            FrameType::Disconnect => 2,
            FrameType::Notify => 3,
            FrameType::AgentHello => 101,
            FrameType::AgentDisconnect => 102,
            FrameType::Ack => 103,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, FrameError> {
        match code {
            1 => Ok(FrameType::Hello),
            2 => Ok(FrameType::Disconnect),
            3 => Ok(FrameType::Notify),
            101 => Ok(FrameType::AgentHello),
            102 => Ok(FrameType::AgentDisconnect),
            103 => Ok(FrameType::Ack),
            other => Err(FrameError::UnknownFrameType(other)),
        }
    }

    /// Label used for metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Hello => "hello",
            FrameType::Disconnect => "disconnect",
            FrameType::Notify => "notify",
            FrameType::AgentHello => "agent-hello",
            FrameType::AgentDisconnect => "agent-disconnect",
            FrameType::Ack => "ack",
        }
    }

    fn carries_kv_list(self) -> bool {
        matches!(
            self,
            FrameType::Hello
                | FrameType::Disconnect
                | FrameType::AgentHello
                | FrameType::AgentDisconnect
        )
    }
}

/// Frame flag bitmask. Unknown bits survive a decode/encode cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u32);

impl FrameFlags {
    pub const FIN: FrameFlags = FrameFlags(0x0000_0001);
    pub const ABORT: FrameFlags = FrameFlags(0x0000_0002);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_fin(self) -> bool {
        self.contains(Self::FIN)
    }

    pub fn is_abort(self) -> bool {
        self.contains(Self::ABORT)
    }
}

impl std::ops::BitOr for FrameFlags {
    type Output = FrameFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        FrameFlags(self.0 | rhs.0)
    }
}

/// Ordered list of named values.
///
/// Kept as a vector so encoding order is whatever the caller built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KvList(Vec<(String, TypedValue)>);

impl KvList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an entry; duplicates are allowed and kept in order.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<TypedValue>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        self.push(key, value);
        self
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&TypedValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, TypedValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn encode(&self, dst: &mut BytesMut) {
        for (key, value) in &self.0 {
            put_bytes(key.as_bytes(), dst);
            value.encode(dst);
        }
    }

    fn decode_all(src: &mut Bytes) -> Result<Self, FrameError> {
        let mut list = KvList::new();
        while src.has_remaining() {
            let key = decode_string(src)?;
            let value = TypedValue::decode(src)?;
            list.0.push((key, value));
        }
        Ok(list)
    }
}

impl From<Vec<(String, TypedValue)>> for KvList {
    fn from(entries: Vec<(String, TypedValue)>) -> Self {
        Self(entries)
    }
}

/// One named message inside a notify frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub name: String,
    pub args: KvList,
}

impl Message {
    pub fn new(name: impl Into<String>, args: KvList) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Proxy-side variable scope targeted by an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarScope {
    Process,
    Session,
    Transaction,
    Request,
    Response,
}

impl VarScope {
    pub fn code(self) -> u8 {
        match self {
            VarScope::Process => 0,
            VarScope::Session => 1,
            VarScope::Transaction => 2,
            VarScope::Request => 3,
            VarScope::Response => 4,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, FrameError> {
        match code {
            0 => Ok(VarScope::Process),
            1 => Ok(VarScope::Session),
            2 => Ok(VarScope::Transaction),
            3 => Ok(VarScope::Request),
            4 => Ok(VarScope::Response),
            other => Err(FrameError::UnknownScope(other)),
        }
    }
}

const ACTION_SET_VAR: u8 = 1;
const ACTION_UNSET_VAR: u8 = 2;

/// One action inside an ack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SetVar {
        scope: VarScope,
        name: String,
        value: TypedValue,
    },
    UnsetVar {
        scope: VarScope,
        name: String,
    },
}

impl Action {
    /// Set a transaction-scoped variable.
    pub fn set_txn(name: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        Action::SetVar {
            scope: VarScope::Transaction,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Unset a transaction-scoped variable.
    pub fn unset_txn(name: impl Into<String>) -> Self {
        Action::UnsetVar {
            scope: VarScope::Transaction,
            name: name.into(),
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        match self {
            Action::SetVar { scope, name, value } => {
                dst.put_u8(ACTION_SET_VAR);
                dst.put_u8(3);
                dst.put_u8(scope.code());
                put_bytes(name.as_bytes(), dst);
                value.encode(dst);
            }
            Action::UnsetVar { scope, name } => {
                dst.put_u8(ACTION_UNSET_VAR);
                dst.put_u8(2);
                dst.put_u8(scope.code());
                put_bytes(name.as_bytes(), dst);
            }
        }
    }

    fn decode(src: &mut Bytes) -> Result<Self, FrameError> {
        if src.remaining() < 3 {
            return Err(FrameError::Truncated("action header"));
        }
        let kind = src.get_u8();
        let nb_args = src.get_u8();
        let scope = VarScope::from_code(src.get_u8())?;
        let name = decode_string(src)?;

        match (kind, nb_args) {
            (ACTION_SET_VAR, 3) => Ok(Action::SetVar {
                scope,
                name,
                value: TypedValue::decode(src)?,
            }),
            (ACTION_UNSET_VAR, 2) => Ok(Action::UnsetVar { scope, name }),
            (ACTION_SET_VAR, _) | (ACTION_UNSET_VAR, _) => {
                Err(FrameError::Malformed("action argument count"))
            }
            (other, _) => Err(FrameError::UnknownActionType(other)),
        }
    }
}

/// Frame body, shaped by the frame type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    KvList(KvList),
    Messages(Vec<Message>),
    Actions(Vec<Action>),
}

impl Payload {
    fn label(&self) -> &'static str {
        match self {
            Payload::KvList(_) => "kv-list",
            Payload::Messages(_) => "messages",
            Payload::Actions(_) => "actions",
        }
    }
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameType,
    pub flags: FrameFlags,
    pub stream_id: u64,
    pub frame_id: u64,
    pub payload: Payload,
}

impl Frame {
    /// Agent hello reply, always on stream 0 / frame 0.
    pub fn agent_hello(items: KvList) -> Self {
        Self {
            kind: FrameType::AgentHello,
            flags: FrameFlags::FIN,
            stream_id: 0,
            frame_id: 0,
            payload: Payload::KvList(items),
        }
    }

    pub fn agent_disconnect(status: DisconnectStatus, message: impl Into<String>) -> Self {
        let items = KvList::new()
            .with("status-code", TypedValue::Uint32(status.code()))
            .with("message", TypedValue::String(message.into()));
        Self {
            kind: FrameType::AgentDisconnect,
            flags: FrameFlags::FIN,
            stream_id: 0,
            frame_id: 0,
            payload: Payload::KvList(items),
        }
    }

    /// Acknowledge the notify identified by `stream_id`/`frame_id`.
    pub fn ack(stream_id: u64, frame_id: u64, actions: Vec<Action>) -> Self {
        Self {
            kind: FrameType::Ack,
            flags: FrameFlags::FIN,
            stream_id,
            frame_id,
            payload: Payload::Actions(actions),
        }
    }

    pub fn notify(stream_id: u64, frame_id: u64, messages: Vec<Message>) -> Self {
        Self {
            kind: FrameType::Notify,
            flags: FrameFlags::FIN,
            stream_id,
            frame_id,
            payload: Payload::Messages(messages),
        }
    }

    /// KV items of a hello/disconnect style frame.
    pub fn kv_list(&self) -> Option<&KvList> {
        match &self.payload {
            Payload::KvList(list) => Some(list),
            _ => None,
        }
    }

    /// Encode the frame body (without length prefix) into `dst`.
    pub fn encode_body(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload_ok = match &self.payload {
            Payload::KvList(_) => self.kind.carries_kv_list(),
            Payload::Messages(_) => self.kind == FrameType::Notify,
            Payload::Actions(_) => self.kind == FrameType::Ack,
        };
        if !payload_ok {
            return Err(FrameError::PayloadMismatch {
                kind: self.kind,
                payload: self.payload.label(),
            });
        }

        dst.put_u8(self.kind.code());
        dst.put_u32(self.flags.bits());
        varint::encode(self.stream_id, dst);
        varint::encode(self.frame_id, dst);

        match &self.payload {
            Payload::KvList(list) => list.encode(dst),
            Payload::Messages(messages) => {
                for message in messages {
                    let nb_args = u8::try_from(message.args.len())
                        .map_err(|_| FrameError::TooManyArguments(message.name.clone()))?;
                    put_bytes(message.name.as_bytes(), dst);
                    dst.put_u8(nb_args);
                    message.args.encode(dst);
                }
            }
            Payload::Actions(actions) => {
                for action in actions {
                    action.encode(dst);
                }
            }
        }

        Ok(())
    }

    /// Encode the frame including its 4-byte length prefix.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let start = dst.len();
        dst.put_u32(0);
        self.encode_body(dst)?;
        let body_len = (dst.len() - start - 4) as u32;
        dst[start..start + 4].copy_from_slice(&body_len.to_be_bytes());
        Ok(())
    }

    /// Decode a frame body (the bytes after the length prefix).
    pub fn decode_body(mut src: Bytes) -> Result<Self, FrameError> {
        if src.remaining() < 5 {
            return Err(FrameError::Truncated("frame header"));
        }
        let kind = FrameType::from_code(src.get_u8())?;
        let flags = FrameFlags::from_bits(src.get_u32());
        let stream_id = varint::decode(&mut src)?;
        let frame_id = varint::decode(&mut src)?;

        let payload = match kind {
            FrameType::Notify => Payload::Messages(decode_messages(&mut src)?),
            FrameType::Ack => {
                let mut actions = Vec::new();
                while src.has_remaining() {
                    actions.push(Action::decode(&mut src)?);
                }
                Payload::Actions(actions)
            }
            _ => Payload::KvList(KvList::decode_all(&mut src)?),
        };

        Ok(Self {
            kind,
            flags,
            stream_id,
            frame_id,
            payload,
        })
    }

    /// Decode a complete length-prefixed frame held in `src`.
    pub fn decode(mut src: Bytes, max_frame_size: usize) -> Result<Self, FrameError> {
        if src.remaining() < 4 {
            return Err(FrameError::Truncated("length prefix"));
        }
        let len = src.get_u32() as usize;
        if len > max_frame_size {
            return Err(FrameError::TooLarge {
                size: len,
                max: max_frame_size,
            });
        }
        if src.remaining() < len {
            return Err(FrameError::Truncated("frame body"));
        }
        Self::decode_body(src.split_to(len))
    }
}

fn decode_messages(src: &mut Bytes) -> Result<Vec<Message>, FrameError> {
    let mut messages = Vec::new();
    while src.has_remaining() {
        let name = decode_string(src)?;
        if !src.has_remaining() {
            return Err(FrameError::Truncated("message argument count"));
        }
        let nb_args = src.get_u8();
        let mut args = Vec::with_capacity(nb_args as usize);
        for _ in 0..nb_args {
            let key = decode_string(src)?;
            let value = TypedValue::decode(src)?;
            args.push((key, value));
        }
        messages.push(Message {
            name,
            args: KvList::from(args),
        });
    }
    Ok(messages)
}
