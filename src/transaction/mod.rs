//! Request/response transaction correlation.
//!
//! # Data Flow
//! ```text
//! request-phase message
//!     → registry.resolve(app) → evaluate(Request)
//!     → table.insert(uuid → {application, verdict, deadline})
//!     → ack: action, status, data, error, id
//!
//! response-phase message (echoes id)
//!     → table.take(id) → same Application → evaluate(Response)
//!     → merge with stored verdict → ack: action, status, data, error
//! ```
//!
//! # Design Decisions
//! - The application is captured once at request phase and never re-resolved
//! - Failures become error-flagged verdicts, never connection errors
//! - Expired entries are invisible immediately and reaped in the background

pub mod correlator;
pub mod table;

pub use correlator::{verdict_actions, Correlator};
pub use table::{CorrelationEntry, CorrelationTable};
