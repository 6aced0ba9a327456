//! SPOE offload agent library.
//!
//! Receives HTTP transaction data from a proxy over the binary offload
//! protocol, evaluates it against named, hot-reloadable applications and
//! answers with verdict variables the proxy enforces.

pub mod agent;
pub mod application;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod transaction;

pub use agent::Agent;
pub use application::{Application, ApplicationRegistry};
pub use config::schema::AgentConfig;
pub use engine::{Evaluator, Phase, Verdict, VerdictAction};
pub use lifecycle::Shutdown;
