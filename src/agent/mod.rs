//! The agent: accept loop, sessions, registry ownership.
//!
//! # Data Flow
//! ```text
//! Listener::accept ──► ConnectionTracker::track ──► Session::run (own task)
//!                                                      │
//!                                       Correlator ◄───┘
//!                                  (per-connection or shared table)
//!
//! replace_applications ──► ApplicationRegistry::replace
//! Shutdown::trigger ──► accept loop stops ──► sessions drain ──► wait_idle
//! ```
//!
//! # Design Decisions
//! - One task per connection, one task per in-flight stream
//! - The accept loop never waits on a session
//! - Shutdown is cooperative with a bounded wait

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use crate::application::{Application, ApplicationRegistry};
use crate::config::{AgentConfig, CorrelationScope, MessagesConfig};
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionPermit, ConnectionTracker, Listener, ListenerError, PeerAddr, Stream};
use crate::session::{Session, SessionConfig};
use crate::transaction::{CorrelationTable, Correlator};

/// Slack on top of the session grace period before giving up on stragglers.
const DRAIN_SLACK: Duration = Duration::from_secs(2);

/// Smallest interval between correlation reaper passes.
const MIN_REAP_INTERVAL: Duration = Duration::from_millis(250);

/// Offload agent serving proxy connections.
pub struct Agent {
    registry: Arc<ApplicationRegistry>,
    session: SessionConfig,
    messages: MessagesConfig,
    scope: CorrelationScope,
    shared_table: CorrelationTable,
    tracker: ConnectionTracker,
}

impl Agent {
    pub fn new(config: &AgentConfig, registry: Arc<ApplicationRegistry>) -> Self {
        Self {
            registry,
            session: SessionConfig::from(config),
            messages: config.messages.clone(),
            scope: config.agent.correlation_scope,
            shared_table: CorrelationTable::new(),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ApplicationRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Atomically publish a new application set.
    pub fn replace_applications(&self, apps: HashMap<String, Arc<Application>>) -> u64 {
        self.registry.replace(apps)
    }

    fn reap_interval(&self) -> Duration {
        self.session.processing_timeout.max(MIN_REAP_INTERVAL)
    }

    fn correlator(&self) -> Correlator {
        let table = match self.scope {
            CorrelationScope::Agent => self.shared_table.clone(),
            CorrelationScope::Connection => {
                let table = CorrelationTable::new();
                table.spawn_reaper(self.reap_interval());
                table
            }
        };
        Correlator::new(
            Arc::clone(&self.registry),
            table,
            self.messages.clone(),
            self.session.processing_timeout,
        )
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn serve(&self, listener: Listener, shutdown: &Shutdown) -> Result<(), ListenerError> {
        let mut stop = shutdown.subscribe();
        let shared_reaper = match self.scope {
            CorrelationScope::Agent => Some(self.shared_table.spawn_reaper(self.reap_interval())),
            CorrelationScope::Connection => None,
        };

        tracing::info!(
            address = %listener.describe(),
            scope = ?self.scope,
            registry_version = self.registry.version(),
            "Agent serving"
        );

        let result = loop {
            tokio::select! {
                _ = stop.recv() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_session(stream, peer, permit, shutdown),
                    Err(ListenerError::Closed) => break Err(ListenerError::Closed),
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        };

        drop(listener);
        tracing::info!(active = self.tracker.active_count(), "Draining sessions");
        if !self
            .tracker
            .wait_idle(self.session.shutdown_grace + DRAIN_SLACK)
            .await
        {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Sessions still open after grace period"
            );
        }

        if let Some(reaper) = shared_reaper {
            reaper.abort();
        }
        result
    }

    fn spawn_session(&self, stream: Stream, peer: PeerAddr, permit: ConnectionPermit, shutdown: &Shutdown) {
        let guard = self.tracker.track();
        let id = guard.id();
        let session = Session::new(
            id,
            self.session.clone(),
            Arc::new(self.correlator()),
            shutdown.subscribe(),
        );
        let span = tracing::info_span!("session", connection_id = %id, peer = %peer);

        tokio::spawn(
            async move {
                let _permit = permit;
                let _guard = guard;
                let (reader, writer) = stream.into_split();
                tracing::debug!("Session started");
                match session.run(reader, writer).await {
                    Ok(()) => tracing::debug!("Session closed"),
                    Err(e) => tracing::warn!(error = %e, "Session ended with error"),
                }
            }
            .instrument(span),
        );
    }
}
