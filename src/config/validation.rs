//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, frame size within protocol bounds)
//! - Reject duplicate or empty application names
//! - Dry-run rule compilation so broken rulesets never reach the registry
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AgentConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::{AgentConfig, BindAddress};
use crate::engine::RuleSet;
use crate::observability::logging;
use crate::protocol::MIN_FRAME_SIZE;

/// Largest frame size we are willing to negotiate.
pub const MAX_FRAME_SIZE_LIMIT: u32 = 16 * 1024 * 1024;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    InvalidBind(String),

    #[error("max_frame_size {0} outside {min}..={max}", min = MIN_FRAME_SIZE, max = MAX_FRAME_SIZE_LIMIT)]
    FrameSize(u32),

    #[error("max_connections must be greater than zero")]
    NoConnections,

    #[error("timeout '{0}' must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("request and response message names must differ")]
    SameMessageNames,

    #[error("invalid log level '{0}'")]
    LogLevel(String),

    #[error("application name must not be empty")]
    EmptyApplicationName,

    #[error("duplicate application '{0}'")]
    DuplicateApplication(String),

    #[error("application '{application}': {error}")]
    Rules { application: String, error: String },
}

/// Check the whole configuration, collecting every error.
pub fn validate_config(config: &AgentConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match &config.bind {
        BindAddress::Tcp(addr) => {
            if addr.parse::<SocketAddr>().is_err() {
                errors.push(ValidationError::InvalidBind(addr.clone()));
            }
        }
        BindAddress::Unix(path) => {
            if path.as_os_str().is_empty() {
                errors.push(ValidationError::InvalidBind(config.bind.to_string()));
            }
        }
    }

    let frame_size = config.agent.max_frame_size;
    if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE_LIMIT).contains(&frame_size) {
        errors.push(ValidationError::FrameSize(frame_size));
    }
    if config.agent.max_connections == 0 {
        errors.push(ValidationError::NoConnections);
    }

    let timeouts = &config.timeouts;
    for (name, value) in [
        ("hello_ms", timeouts.hello_ms),
        ("idle_ms", timeouts.idle_ms),
        ("processing_ms", timeouts.processing_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    if config.messages.request == config.messages.response {
        errors.push(ValidationError::SameMessageNames);
    }

    if logging::parse_level(&config.observability.log_level).is_err() {
        errors.push(ValidationError::LogLevel(config.observability.log_level.clone()));
    }

    let mut names = HashSet::new();
    for app in &config.applications {
        if app.name.is_empty() {
            errors.push(ValidationError::EmptyApplicationName);
        } else if !names.insert(app.name.as_str()) {
            errors.push(ValidationError::DuplicateApplication(app.name.clone()));
        }

        if app.transaction_ttl_ms == Some(0) {
            errors.push(ValidationError::ZeroTimeout("transaction_ttl_ms"));
        }

        if let Err(e) = RuleSet::compile(app.mode, &app.rules) {
            errors.push(ValidationError::Rules {
                application: app.name.clone(),
                error: e.to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ApplicationConfig, EngineMode};

    fn app(name: &str) -> ApplicationConfig {
        ApplicationConfig {
            name: name.to_string(),
            mode: EngineMode::On,
            response_check: true,
            transaction_ttl_ms: None,
            rules_file: None,
            rules: Vec::new(),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&AgentConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = AgentConfig::default();
        config.bind = BindAddress::Tcp("not an address".into());
        config.agent.max_frame_size = 10;
        config.timeouts.processing_ms = 0;
        config.observability.log_level = "spoa_agent=loud".into();
        config.applications = vec![app("a"), app("a"), app("")];

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::InvalidBind("not an address".into())));
        assert!(errors.contains(&ValidationError::FrameSize(10)));
        assert!(errors.contains(&ValidationError::ZeroTimeout("processing_ms")));
        assert!(errors.contains(&ValidationError::LogLevel("spoa_agent=loud".into())));
        assert!(errors.contains(&ValidationError::DuplicateApplication("a".into())));
        assert!(errors.contains(&ValidationError::EmptyApplicationName));
    }

    #[test]
    fn broken_rules_fail_validation() {
        let mut config = AgentConfig::default();
        let mut bad = app("default");
        bad.rules.push(crate::config::schema::RuleConfig {
            id: 1,
            phase: crate::engine::Phase::Request,
            target: "path".into(),
            operator: crate::config::schema::Operator::Rx,
            value: Some("(".into()),
            transforms: Vec::new(),
            action: crate::engine::VerdictAction::Deny,
            status: None,
            data: None,
            msg: None,
        });
        config.applications.push(bad);

        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(&errors[0], ValidationError::Rules { application, .. } if application == "default"));
    }
}
