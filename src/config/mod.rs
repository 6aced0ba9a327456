//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, deserialize, pull in rules files)
//!     → validation.rs (semantic checks, rule compilation dry-run)
//!     → AgentConfig (validated, immutable)
//!
//! On reload signal (SIGHUP or watcher.rs):
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → lifecycle::reload builds new applications
//!     → registry publishes the new snapshot atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AgentConfig, ApplicationConfig, BindAddress, CorrelationScope, EngineMode, LimitsConfig,
    LogFormat, MessagesConfig, ObservabilityConfig, RuleConfig, TimeoutConfig,
};
