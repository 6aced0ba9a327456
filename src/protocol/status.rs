//! Disconnect status codes.

use std::fmt;

/// Reason carried in disconnect and agent-disconnect frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectStatus {
    Normal,
    Io,
    Timeout,
    FrameTooBig,
    InvalidFrame,
    NoVersion,
    NoFrameSize,
    NoCapabilities,
    BadVersion,
    BadFrameSize,
    FragmentationNotSupported,
    InterlacedFrames,
    FrameIdNotFound,
    ResourceAllocation,
    Unknown,
}

impl DisconnectStatus {
    pub fn code(self) -> u32 {
        match self {
            DisconnectStatus::Normal => 0,
            DisconnectStatus::Io => 1,
            DisconnectStatus::Timeout => 2,
            DisconnectStatus::FrameTooBig => 3,
            DisconnectStatus::InvalidFrame => 4,
            DisconnectStatus::NoVersion => 5,
            DisconnectStatus::NoFrameSize => 6,
            DisconnectStatus::NoCapabilities => 7,
            DisconnectStatus::BadVersion => 8,
            DisconnectStatus::BadFrameSize => 9,
            DisconnectStatus::FragmentationNotSupported => 10,
            DisconnectStatus::InterlacedFrames => 11,
            DisconnectStatus::FrameIdNotFound => 12,
            DisconnectStatus::ResourceAllocation => 13,
            DisconnectStatus::Unknown => 99,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0 => DisconnectStatus::Normal,
            1 => DisconnectStatus::Io,
            2 => DisconnectStatus::Timeout,
            3 => DisconnectStatus::FrameTooBig,
            4 => DisconnectStatus::InvalidFrame,
            5 => DisconnectStatus::NoVersion,
            6 => DisconnectStatus::NoFrameSize,
            7 => DisconnectStatus::NoCapabilities,
            8 => DisconnectStatus::BadVersion,
            9 => DisconnectStatus::BadFrameSize,
            10 => DisconnectStatus::FragmentationNotSupported,
            11 => DisconnectStatus::InterlacedFrames,
            12 => DisconnectStatus::FrameIdNotFound,
            13 => DisconnectStatus::ResourceAllocation,
            _ => DisconnectStatus::Unknown,
        }
    }

    /// Default message sent alongside the code.
    pub fn message(self) -> &'static str {
        match self {
            DisconnectStatus::Normal => "normal",
            DisconnectStatus::Io => "I/O error",
            DisconnectStatus::Timeout => "a timeout occurred",
            DisconnectStatus::FrameTooBig => "frame is too big",
            DisconnectStatus::InvalidFrame => "invalid frame received",
            DisconnectStatus::NoVersion => "version value not found",
            DisconnectStatus::NoFrameSize => "max-frame-size value not found",
            DisconnectStatus::NoCapabilities => "capabilities value not found",
            DisconnectStatus::BadVersion => "unsupported version",
            DisconnectStatus::BadFrameSize => "max-frame-size too big or too small",
            DisconnectStatus::FragmentationNotSupported => "payload fragmentation is not supported",
            DisconnectStatus::InterlacedFrames => "invalid interlaced frames",
            DisconnectStatus::FrameIdNotFound => "frame-id not found",
            DisconnectStatus::ResourceAllocation => "resource allocation error",
            DisconnectStatus::Unknown => "an unknown error occurred",
        }
    }
}

impl fmt::Display for DisconnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}
