//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP or Unix connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (connection id, active tracking)
//!     → Hand off to session layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Transport is erased into boxed read/write halves so sessions are
//!   identical over TCP and Unix sockets

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError, PeerAddr, Stream};
