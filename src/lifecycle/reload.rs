//! Configuration reload.
//!
//! # Responsibilities
//! - Re-read and validate the config file
//! - Refuse changes that need a restart (bind address)
//! - Build the full application set before publishing it
//! - Apply log level changes to the installed subscriber
//!
//! # Design Decisions
//! - All-or-nothing: any failure keeps the current registry snapshot
//! - Applications and the log level are live; other changes are logged and ignored

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::application::{build_applications, ApplicationRegistry, BuildError};
use crate::config::{load_config, AgentConfig, BindAddress, ConfigError};
use crate::observability::logging::{self, LogHandle, LogLevelError};
use crate::observability::metrics;

/// Why a reload was rejected.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("bind address changed from {from} to {to}; restart required")]
    BindChanged { from: BindAddress, to: BindAddress },

    #[error("applications: {0}")]
    Build(#[from] BuildError),

    #[error("logging: {0}")]
    Logging(#[from] LogLevelError),
}

/// Reloads applications and the log level from the config file.
pub struct Reloader {
    path: PathBuf,
    registry: Arc<ApplicationRegistry>,
    logs: Option<LogHandle>,
    running: Mutex<AgentConfig>,
}

impl Reloader {
    /// `active` is the configuration the agent was started with.
    pub fn new(path: &Path, active: AgentConfig, registry: Arc<ApplicationRegistry>) -> Self {
        Self {
            path: path.to_path_buf(),
            registry,
            logs: None,
            running: Mutex::new(active),
        }
    }

    /// Route `observability.log_level` changes to `logs`.
    pub fn with_log_handle(mut self, logs: LogHandle) -> Self {
        self.logs = Some(logs);
        self
    }

    /// The configuration currently in effect.
    pub fn running(&self) -> AgentConfig {
        self.running.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Reload from disk, returning the new registry version.
    pub fn reload(&self) -> Result<u64, ReloadError> {
        let result = load_config(&self.path)
            .map_err(ReloadError::from)
            .and_then(|config| self.apply(config));

        match &result {
            Ok(version) => tracing::info!(version, path = %self.path.display(), "Configuration reloaded"),
            Err(e) => {
                metrics::record_error("reload");
                tracing::error!(error = %e, path = %self.path.display(), "Reload rejected, keeping current configuration");
            }
        }
        result
    }

    /// Apply an already loaded configuration.
    pub fn apply(&self, config: AgentConfig) -> Result<u64, ReloadError> {
        // `running` only follows what actually changed in the process, so
        // restart-only differences are reported on every reload until restart.
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());

        if config.bind != running.bind {
            return Err(ReloadError::BindChanged {
                from: running.bind.clone(),
                to: config.bind,
            });
        }

        let level = &config.observability.log_level;
        let level_changed = *level != running.observability.log_level;
        if level_changed {
            logging::parse_level(level)?;
        }

        let apps = build_applications(&config.applications)?;

        let (old, new) = (&running.observability, &config.observability);
        if config.watch != running.watch
            || config.agent != running.agent
            || config.timeouts != running.timeouts
            || config.messages != running.messages
            || new.log_format != old.log_format
            || new.metrics_enabled != old.metrics_enabled
            || new.metrics_address != old.metrics_address
        {
            tracing::warn!("Only applications and the log level are reloaded; other changes apply after restart");
        }

        let version = self.registry.replace(apps);
        running.applications = config.applications;

        if level_changed {
            match self.logs.as_ref().map(|logs| logs.set_level(level)) {
                Some(Ok(true)) => running.observability.log_level = level.clone(),
                Some(Ok(false)) => {}
                Some(Err(e)) => tracing::warn!(error = %e, "Log level not changed"),
                None => tracing::debug!(level = %level, "No log handle; level unchanged"),
            }
        }

        Ok(version)
    }
}
