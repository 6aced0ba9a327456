//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Configure log level at runtime
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, text format for development
//! - Log level configurable via config and `RUST_LOG`, the latter wins
//! - The level filter sits behind a reload layer; the format is fixed at startup

use thiserror::Error;
use tracing_subscriber::{
    filter::ParseError, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::config::{LogFormat, ObservabilityConfig};

/// Log level change that could not be applied.
#[derive(Debug, Error)]
pub enum LogLevelError {
    #[error("invalid log level '{level}': {source}")]
    Parse {
        level: String,
        #[source]
        source: ParseError,
    },

    #[error("log filter unavailable: {0}")]
    Reload(#[from] reload::Error),
}

/// Parse a configured level or directive string such as `info,spoa_agent=debug`.
pub fn parse_level(level: &str) -> Result<EnvFilter, LogLevelError> {
    EnvFilter::try_new(level).map_err(|source| LogLevelError::Parse {
        level: level.to_string(),
        source,
    })
}

/// Changes the level of the installed subscriber.
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    env_override: bool,
}

impl LogHandle {
    /// `env_override` marks a filter taken from `RUST_LOG`, which config
    /// changes never replace.
    pub fn new(filter: reload::Handle<EnvFilter, Registry>, env_override: bool) -> Self {
        Self {
            filter,
            env_override,
        }
    }

    /// Swap in `level`. Returns `false` when `RUST_LOG` pins the filter.
    pub fn set_level(&self, level: &str) -> Result<bool, LogLevelError> {
        let filter = parse_level(level)?;
        if self.env_override {
            tracing::info!(level, "RUST_LOG is set; keeping its filter");
            return Ok(false);
        }
        self.filter.reload(filter)?;
        tracing::info!(level, "Log level changed");
        Ok(true)
    }

    /// The active filter directives, lowercased.
    pub fn current(&self) -> Option<String> {
        self.filter
            .with_current(|filter| filter.to_string().to_lowercase())
            .ok()
    }
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle")
            .field("current", &self.current())
            .field("env_override", &self.env_override)
            .finish()
    }
}

/// Install the global subscriber.
///
/// Returns `None` when a subscriber is already installed; the first one
/// stays in place.
pub fn init(config: &ObservabilityConfig) -> Option<LogHandle> {
    let from_env = EnvFilter::try_from_default_env();
    let env_override = from_env.is_ok();
    let filter = from_env
        .or_else(|_| parse_level(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (filter, handle) = reload::Layer::new(filter);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    };

    match result {
        Ok(()) => Some(LogHandle::new(handle, env_override)),
        Err(_) => {
            tracing::debug!("Tracing subscriber already installed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_changes_reach_the_filter() {
        let (layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        let logs = LogHandle::new(handle, false);

        assert_eq!(logs.current().as_deref(), Some("info"));
        assert!(logs.set_level("debug").unwrap());
        assert_eq!(logs.current().as_deref(), Some("debug"));
        drop(layer);
    }

    #[test]
    fn env_filter_is_not_replaced() {
        let (layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("warn"));
        let logs = LogHandle::new(handle, true);

        assert!(!logs.set_level("trace").unwrap());
        assert_eq!(logs.current().as_deref(), Some("warn"));
        drop(layer);
    }

    #[test]
    fn bad_level_is_rejected() {
        assert!(matches!(
            parse_level("spoa_agent=loud"),
            Err(LogLevelError::Parse { .. })
        ));
    }
}
