//! Applications and the registry that publishes them.
//!
//! # Data Flow
//! ```text
//! [[applications]] config
//!     → application.rs (compile ruleset, build immutable Application)
//!     → build_applications (whole set or nothing)
//!     → registry.rs (publish new ApplicationSet in one atomic swap)
//!
//! Transaction start:
//!     registry.resolve(name) → Arc<Application>, held until the
//!     transaction's response phase completes
//! ```
//!
//! # Design Decisions
//! - Applications are never mutated; reload always builds new ones
//! - Readers never block: the registry is an `ArcSwap` snapshot
//! - In-flight transactions keep their `Arc<Application>` alive after a swap

pub mod application;
pub mod registry;

pub use application::{build_applications, Application, BuildError};
pub use registry::{ApplicationRegistry, ApplicationSet, ResolutionError, DEFAULT_APPLICATION};
