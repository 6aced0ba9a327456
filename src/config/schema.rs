//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the agent.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{Phase, VerdictAction};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Root configuration for the offload agent.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Bind address: `host:port` or `unix:///path/to/socket`.
    pub bind: BindAddress,

    /// Reload automatically when the config file changes.
    pub watch: bool,

    /// Session and listener limits.
    pub agent: LimitsConfig,

    /// Protocol timeouts.
    pub timeouts: TimeoutConfig,

    /// Message names mapped to phases.
    pub messages: MessagesConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Named rulesets.
    pub applications: Vec<ApplicationConfig>,
}

/// Where the agent listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum BindAddress {
    Tcp(String),
    Unix(PathBuf),
}

impl BindAddress {
    const UNIX_PREFIX: &'static str = "unix://";
}

impl Default for BindAddress {
    fn default() -> Self {
        BindAddress::Tcp("127.0.0.1:9000".to_string())
    }
}

impl From<String> for BindAddress {
    fn from(raw: String) -> Self {
        match raw.strip_prefix(Self::UNIX_PREFIX) {
            Some(path) => BindAddress::Unix(PathBuf::from(path)),
            None => BindAddress::Tcp(raw),
        }
    }
}

impl From<BindAddress> for String {
    fn from(bind: BindAddress) -> Self {
        bind.to_string()
    }
}

impl std::fmt::Display for BindAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindAddress::Tcp(addr) => write!(f, "{}", addr),
            BindAddress::Unix(path) => write!(f, "{}{}", Self::UNIX_PREFIX, path.display()),
        }
    }
}

/// Where correlation entries live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationScope {
    /// One table per connection.
    #[default]
    Connection,
    /// One table shared by every connection of the agent.
    Agent,
}

/// Session and listener limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest frame the agent accepts or negotiates.
    pub max_frame_size: u32,

    /// Maximum concurrent proxy connections (backpressure).
    pub max_connections: usize,

    /// Scope of the request/response correlation table.
    pub correlation_scope: CorrelationScope,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_connections: 1_024,
            correlation_scope: CorrelationScope::Connection,
        }
    }
}

/// Timeout configuration for the protocol.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for the proxy's hello after accept.
    pub hello_ms: u64,

    /// Close a connection after this long without a frame.
    pub idle_ms: u64,

    /// Bound between receiving a notify and sending its ack.
    pub processing_ms: u64,

    /// How long shutdown waits for in-flight streams.
    pub shutdown_grace_ms: u64,
}

impl TimeoutConfig {
    pub fn hello(&self) -> Duration {
        Duration::from_millis(self.hello_ms)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn processing(&self) -> Duration {
        Duration::from_millis(self.processing_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            hello_ms: 2_000,
            idle_ms: 120_000,
            processing_ms: 500,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Notify message names that carry each phase.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MessagesConfig {
    pub request: String,
    pub response: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            request: "coraza-req".to_string(),
            response: "coraza-res".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Text for humans, JSON for log shippers.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9091".to_string(),
        }
    }
}

/// Rule engine mode for an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineMode {
    #[default]
    On,
    DetectionOnly,
    Off,
}

/// One named ruleset.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ApplicationConfig {
    /// Unique, case-sensitive name. `default` is used when none is given.
    pub name: String,

    #[serde(default)]
    pub mode: EngineMode,

    /// Evaluate the response phase; when false the stored request verdict
    /// is returned unchanged.
    #[serde(default = "default_response_check")]
    pub response_check: bool,

    /// How long a request-phase entry waits for its response phase.
    /// Falls back to the processing timeout.
    #[serde(default)]
    pub transaction_ttl_ms: Option<u64>,

    /// Extra rules loaded from a TOML file (`[[rules]]` tables).
    #[serde(default)]
    pub rules_file: Option<PathBuf>,

    /// Inline rules, evaluated before the ones from `rules_file`.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

fn default_response_check() -> bool {
    true
}

/// File form of `rules_file`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RulesFile {
    pub rules: Vec<RuleConfig>,
}

/// Comparison applied to a rule target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Streq,
    Contains,
    BeginsWith,
    Rx,
    Present,
    Absent,
    Eq,
    Gt,
    Lt,
}

/// Value transformation applied before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    None,
    Lowercase,
    Trim,
}

/// A single rule definition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RuleConfig {
    pub id: u32,
    pub phase: Phase,
    /// `method`, `path`, `query`, `uri`, `version`, `body`, `status`,
    /// `src-ip`, `dst-ip`, `src-port`, `dst-port`, `header:<name>` or
    /// `headers-count:<name>`.
    pub target: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub transforms: Vec<Transform>,
    pub action: VerdictAction,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}
