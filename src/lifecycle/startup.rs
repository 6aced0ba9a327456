//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start background tasks (metrics, config watcher)
//! - Bind the listener and begin accepting traffic
//! - Route signals to reload and shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listener starts last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::agent::Agent;
use crate::application::{build_applications, ApplicationRegistry, BuildError};
use crate::config::watcher::ConfigWatcher;
use crate::config::AgentConfig;
use crate::lifecycle::{Reloader, Shutdown, SignalType, Signals};
use crate::net::{Listener, ListenerError};
use crate::observability::logging::LogHandle;
use crate::observability::metrics;

/// Fatal error while starting or running the agent.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("applications: {0}")]
    Build(#[from] BuildError),

    #[error("listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error("config watcher: {0}")]
    Watcher(#[from] notify::Error),

    #[error("metrics: {0}")]
    Metrics(String),

    #[error("agent task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Run the agent until a shutdown signal completes the drain.
///
/// `logs` lets reloads change the log level of the installed subscriber.
pub async fn run(
    config_path: &Path,
    config: AgentConfig,
    logs: Option<LogHandle>,
) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|e: std::net::AddrParseError| StartupError::Metrics(e.to_string()))?;
        metrics::init_metrics(addr).map_err(StartupError::Metrics)?;
    }

    let apps = build_applications(&config.applications)?;
    if apps.is_empty() {
        tracing::warn!("No applications configured; every transaction will report an error");
    }
    let registry = Arc::new(ApplicationRegistry::new(apps));

    let listener = Listener::bind(&config.bind, config.agent.max_connections).await?;
    let agent = Arc::new(Agent::new(&config, Arc::clone(&registry)));
    let mut reloader = Reloader::new(config_path, config.clone(), registry);
    if let Some(logs) = logs {
        reloader = reloader.with_log_handle(logs);
    }
    let reloader = Arc::new(reloader);
    let shutdown = Arc::new(Shutdown::new());
    let mut signals = Signals::new().map_err(StartupError::Signals)?;

    let _watcher = if config.watch {
        let (watcher, mut changes) = ConfigWatcher::new(config_path);
        let handle = watcher.run()?;
        let reloader = Arc::clone(&reloader);
        tokio::spawn(async move {
            while changes.recv().await.is_some() {
                let _ = reloader.reload();
            }
        });
        Some(handle)
    } else {
        None
    };

    let mut serve = {
        let agent = Arc::clone(&agent);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { agent.serve(listener, &shutdown).await })
    };

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                SignalType::Reload => {
                    let _ = reloader.reload();
                }
                SignalType::Shutdown => break,
            },
            result = &mut serve => return Ok(result??),
        }
    }

    tracing::info!("Shutting down");
    shutdown.trigger();

    loop {
        tokio::select! {
            result = &mut serve => {
                result??;
                break;
            }
            signal = signals.recv() => {
                if signal == SignalType::Shutdown {
                    tracing::warn!(active = agent.tracker().active_count(), "Forced shutdown");
                    serve.abort();
                    break;
                }
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
