//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A second SIGTERM/SIGINT during drain forces exit (handled by the caller)
//! - SIGHUP triggers config reload, not shutdown

use tokio::signal::unix::{signal, Signal, SignalKind};

/// What a received signal asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    Reload,
    Shutdown,
}

/// Registered process signal streams.
pub struct Signals {
    hangup: Signal,
    terminate: Signal,
    interrupt: Signal,
}

impl Signals {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next signal of interest.
    pub async fn recv(&mut self) -> SignalType {
        let received = tokio::select! {
            _ = self.hangup.recv() => SignalType::Reload,
            _ = self.terminate.recv() => SignalType::Shutdown,
            _ = self.interrupt.recv() => SignalType::Shutdown,
        };
        tracing::info!(signal = ?received, "Signal received");
        received
    }
}
