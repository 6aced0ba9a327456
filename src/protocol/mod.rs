//! Offload protocol subsystem.
//!
//! # Data Flow
//! ```text
//! socket bytes
//!     → codec.rs (4-byte length prefix, max-frame enforcement)
//!     → frame.rs (header: type, flags, stream-id, frame-id; typed payload)
//!     → value.rs (typed values inside KV lists, messages and actions)
//!     → varint.rs (variable-length integers used everywhere above)
//! ```
//!
//! # Design Decisions
//! - Decoding is strict: unknown frame types and value tags are errors
//! - Encoding preserves caller order, so output is byte-stable
//! - No state lives here; sessions own all connection state

pub mod codec;
pub mod frame;
pub mod status;
pub mod value;
pub mod varint;

pub use codec::{read_frame, write_frame, CodecError};
pub use frame::{
    Action, Frame, FrameError, FrameFlags, FrameType, KvList, Message, Payload, VarScope,
};
pub use status::DisconnectStatus;
pub use value::TypedValue;

/// Protocol versions this agent speaks.
pub const SUPPORTED_VERSIONS: &[&str] = &["2.0"];

/// Capabilities this agent is able to honor.
pub const SUPPORTED_CAPABILITIES: &[&str] = &["pipelining", "async"];

/// Smallest frame size a peer may negotiate.
pub const MIN_FRAME_SIZE: u32 = 256;

/// Default maximum frame size (matches the proxy's default).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
