//! Inspection engine boundary.
//!
//! # Data Flow
//! ```text
//! notify message args
//!     → Arguments (ordered, typed)
//!     → Evaluator::evaluate(phase, args)   (rules.rs or any external engine)
//!     → Verdict { action, status, data, error }
//! ```
//!
//! # Design Decisions
//! - The agent never interprets why a verdict was produced
//! - Evaluators are async so they may block on I/O or offload CPU work
//! - Failures are values (`EvaluationError`), never connection errors

pub mod headers;
pub mod rules;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{KvList, TypedValue};

pub use headers::HeaderBlock;
pub use rules::RuleSet;

/// HTTP phase at which the proxy offloads data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Request,
    Response,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Request => "request",
            Phase::Response => "response",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message arguments handed to the evaluator.
pub type Arguments = KvList;

/// Action the proxy should enforce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictAction {
    #[default]
    None,
    Allow,
    Deny,
    Drop,
    Redirect,
}

impl VerdictAction {
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictAction::None => "none",
            VerdictAction::Allow => "allow",
            VerdictAction::Deny => "deny",
            VerdictAction::Drop => "drop",
            VerdictAction::Redirect => "redirect",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(VerdictAction::None),
            "allow" => Some(VerdictAction::Allow),
            "deny" => Some(VerdictAction::Deny),
            "drop" => Some(VerdictAction::Drop),
            "redirect" => Some(VerdictAction::Redirect),
            _ => None,
        }
    }

    /// Deny and drop block the transaction.
    pub fn is_blocking(self) -> bool {
        matches!(self, VerdictAction::Deny | VerdictAction::Drop)
    }
}

/// Value of the `error` variable returned to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
    #[default]
    None,
    /// The evaluator failed.
    Evaluation,
    /// Processing exceeded its deadline.
    Timeout,
    /// No application could be resolved.
    Configuration,
    /// Response phase referenced an unknown or expired transaction.
    UnknownTransaction,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::Evaluation => 1,
            ErrorCode::Timeout => 2,
            ErrorCode::Configuration => 3,
            ErrorCode::UnknownTransaction => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::None => "none",
            ErrorCode::Evaluation => "evaluation",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Configuration => "configuration",
            ErrorCode::UnknownTransaction => "unknown_transaction",
        }
    }
}

/// The (action, status, data, error) tuple returned for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verdict {
    pub action: VerdictAction,
    pub status: u16,
    pub data: String,
    pub error: ErrorCode,
}

impl Verdict {
    /// No opinion: the proxy continues normally.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn allow() -> Self {
        Self {
            action: VerdictAction::Allow,
            ..Self::default()
        }
    }

    pub fn deny(status: u16) -> Self {
        Self {
            action: VerdictAction::Deny,
            status,
            ..Self::default()
        }
    }

    pub fn silent_drop() -> Self {
        Self {
            action: VerdictAction::Drop,
            ..Self::default()
        }
    }

    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self {
            action: VerdictAction::Redirect,
            status,
            data: location.into(),
            ..Self::default()
        }
    }

    /// Error-flagged verdict with no action.
    pub fn error(code: ErrorCode) -> Self {
        Self {
            error: code,
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error != ErrorCode::None
    }
}

/// Failure inside an evaluator.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("missing argument '{0}'")]
    MissingArgument(&'static str),

    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("evaluator failed: {0}")]
    Internal(String),
}

/// An inspection engine bound to one application.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Produce a verdict for one phase of a transaction.
    async fn evaluate(&self, phase: Phase, args: &Arguments) -> Result<Verdict, EvaluationError>;
}

/// Look up a string-ish argument, accepting both string and binary values.
pub fn arg_str<'a>(args: &'a Arguments, name: &str) -> Option<std::borrow::Cow<'a, str>> {
    match args.get(name)? {
        TypedValue::String(s) => Some(std::borrow::Cow::Borrowed(s.as_str())),
        TypedValue::Binary(b) => Some(String::from_utf8_lossy(b)),
        TypedValue::Null => None,
        other => Some(std::borrow::Cow::Owned(other.to_string())),
    }
}
