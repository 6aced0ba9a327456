//! Connection session: one proxy connection from hello to close.
//!
//! # Data Flow
//! ```text
//! read half ──► read_frame ──► AwaitingHello ── hello ──► handshake.rs
//!                                   │                        │
//!                                   │                  agent-hello
//!                                   ▼                        ▼
//!                              Established ── notify ──► stream task
//!                                   │          (chained per stream-id,
//!                                   │           deadline-bounded)
//!                                   │                        │
//!                                   │                       ack
//!                                   ▼                        ▼
//!                         Closing ──► Closed        mpsc ──► writer task ──► write half
//! ```
//!
//! # Design Decisions
//! - A single writer task owns the socket's write half; everyone else sends frames to it
//! - A notify waits for the previous task of its stream, so a stream is applied in order
//! - Different streams never wait for each other
//! - Every notify gets an ack before its deadline, even if evaluation is still running

pub mod handshake;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::AgentConfig;
use crate::engine::{ErrorCode, Verdict};
use crate::net::listener::{ReadHalf, WriteHalf};
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::protocol::{
    read_frame, write_frame, Action, CodecError, DisconnectStatus, Frame, FrameType, Message,
    Payload, TypedValue,
};
use crate::transaction::{verdict_actions, Correlator};

pub use handshake::{negotiate, HandshakeError, NegotiatedParams};

/// Frames queued for the writer before stream tasks wait.
const WRITE_QUEUE_DEPTH: usize = 256;

/// How long the writer may take to flush after the session stops.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-session settings derived from the agent configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub hello_timeout: Duration,
    pub idle_timeout: Duration,
    pub processing_timeout: Duration,
    pub shutdown_grace: Duration,
    pub max_frame_size: u32,
}

impl From<&AgentConfig> for SessionConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            hello_timeout: config.timeouts.hello(),
            idle_timeout: config.timeouts.idle(),
            processing_timeout: config.timeouts.processing(),
            shutdown_grace: config.timeouts.shutdown_grace(),
            max_frame_size: config.agent.max_frame_size,
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHello,
    Established,
    Closing,
    Closed,
}

/// Why a session ended abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("protocol violation: {0}")]
    Protocol(DisconnectStatus),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("writer closed")]
    WriterClosed,
}

impl SessionError {
    /// Status to report to the proxy, if the socket is still worth writing to.
    pub fn disconnect_status(&self) -> Option<DisconnectStatus> {
        match self {
            SessionError::Handshake(e) => Some(e.status()),
            SessionError::Codec(CodecError::Frame(e)) => Some(e.status()),
            SessionError::Codec(CodecError::Io(_)) => None,
            SessionError::Protocol(status) => Some(*status),
            SessionError::Timeout(_) => Some(DisconnectStatus::Timeout),
            SessionError::WriterClosed => None,
        }
    }
}

/// What ended the established loop.
enum Event {
    Shutdown,
    WriterClosed,
    Read(Result<Result<Option<Frame>, CodecError>, tokio::time::error::Elapsed>),
}

/// One proxy connection.
pub struct Session {
    id: ConnectionId,
    config: SessionConfig,
    correlator: Arc<Correlator>,
    shutdown: broadcast::Receiver<()>,
    state: SessionState,
    streams: HashMap<u64, JoinHandle<()>>,
}

impl Session {
    pub fn new(
        id: ConnectionId,
        config: SessionConfig,
        correlator: Arc<Correlator>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            config,
            correlator,
            shutdown,
            state: SessionState::AwaitingHello,
            streams: HashMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(
                connection_id = %self.id,
                from = ?self.state,
                to = ?next,
                "Session state change"
            );
            self.state = next;
        }
    }

    /// Drive the connection until it closes.
    pub async fn run(mut self, mut reader: ReadHalf, writer: WriteHalf) -> Result<(), SessionError> {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let writer_task = tokio::spawn(write_loop(writer, rx));

        let result = match self.handshake(&mut reader, &tx).await {
            Ok(Some(params)) if !params.healthcheck => {
                self.transition(SessionState::Established);
                self.serve(&mut reader, &tx, params).await
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };

        self.abort_streams();

        self.transition(SessionState::Closing);
        if let Err(e) = &result {
            if let Some(status) = e.disconnect_status() {
                tracing::warn!(connection_id = %self.id, error = %e, "Closing session on error");
                metrics::record_error("protocol");
                send_disconnect(&tx, status, &e.to_string()).await;
            }
        }
        drop(tx);

        match timeout(WRITER_FLUSH_TIMEOUT, writer_task).await {
            Ok(Ok(Err(e))) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Writer stopped with error")
            }
            Err(_) => tracing::debug!(connection_id = %self.id, "Writer flush timed out"),
            _ => {}
        }

        self.transition(SessionState::Closed);
        result
    }

    /// Wait for the proxy hello and answer it.
    ///
    /// `Ok(None)` means the peer left before saying hello.
    async fn handshake(
        &mut self,
        reader: &mut ReadHalf,
        tx: &mpsc::Sender<Frame>,
    ) -> Result<Option<NegotiatedParams>, SessionError> {
        let max = self.config.max_frame_size as usize;
        let frame = match timeout(self.config.hello_timeout, read_frame(reader, max)).await {
            Err(_) => return Err(SessionError::Timeout("hello")),
            Ok(read) => match read? {
                Some(frame) => frame,
                None => return Ok(None),
            },
        };
        metrics::record_frame(frame.kind.as_str(), "in");

        let params = negotiate(&frame, self.config.max_frame_size)?;
        tx.send(params.agent_hello())
            .await
            .map_err(|_| SessionError::WriterClosed)?;

        tracing::info!(
            connection_id = %self.id,
            version = %params.version,
            max_frame_size = params.max_frame_size,
            capabilities = %params.capabilities.join(","),
            healthcheck = params.healthcheck,
            engine_id = params.engine_id.as_deref().unwrap_or(""),
            "Handshake complete"
        );

        Ok(Some(params))
    }

    async fn serve(
        &mut self,
        reader: &mut ReadHalf,
        tx: &mpsc::Sender<Frame>,
        params: NegotiatedParams,
    ) -> Result<(), SessionError> {
        let max = params.max_frame_size as usize;

        loop {
            let event = tokio::select! {
                _ = self.shutdown.recv() => Event::Shutdown,
                _ = tx.closed() => Event::WriterClosed,
                read = timeout(self.config.idle_timeout, read_frame(reader, max)) => Event::Read(read),
            };

            let frame = match event {
                Event::Shutdown => {
                    self.drain().await;
                    self.disconnect(tx, DisconnectStatus::Normal, "agent shutting down")
                        .await;
                    return Ok(());
                }
                Event::WriterClosed => return Err(SessionError::WriterClosed),
                Event::Read(Err(_)) => {
                    tracing::debug!(connection_id = %self.id, "Idle timeout");
                    self.abort_streams();
                    self.disconnect(tx, DisconnectStatus::Timeout, "idle timeout")
                        .await;
                    return Ok(());
                }
                Event::Read(Ok(read)) => match read? {
                    Some(frame) => frame,
                    None => {
                        tracing::debug!(connection_id = %self.id, "Proxy closed connection");
                        return Ok(());
                    }
                },
            };

            metrics::record_frame(frame.kind.as_str(), "in");

            match frame.kind {
                FrameType::Notify => self.notify(frame, tx)?,
                FrameType::Disconnect => {
                    log_proxy_disconnect(self.id, &frame);
                    self.abort_streams();
                    self.disconnect(tx, DisconnectStatus::Normal, "proxy disconnected")
                        .await;
                    return Ok(());
                }
                _ => return Err(SessionError::Protocol(DisconnectStatus::InvalidFrame)),
            }
        }
    }

    /// Schedule a notify behind earlier work on the same stream.
    fn notify(&mut self, frame: Frame, tx: &mpsc::Sender<Frame>) -> Result<(), SessionError> {
        let deadline = Instant::now() + self.config.processing_timeout;
        let (stream_id, frame_id) = (frame.stream_id, frame.frame_id);

        if frame.flags.is_abort() {
            tracing::debug!(connection_id = %self.id, stream_id, frame_id, "Notify aborted by proxy");
            return Ok(());
        }
        if !frame.flags.is_fin() {
            return Err(SessionError::Protocol(
                DisconnectStatus::FragmentationNotSupported,
            ));
        }
        let Payload::Messages(messages) = frame.payload else {
            return Err(SessionError::Protocol(DisconnectStatus::InvalidFrame));
        };

        self.streams.retain(|_, task| !task.is_finished());
        let previous = self.streams.remove(&stream_id);

        let correlator = Arc::clone(&self.correlator);
        let tx = tx.clone();
        let connection_id = self.id;

        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }

            let actions = match timeout_at(deadline, process(&correlator, &messages)).await {
                Ok(actions) => actions,
                Err(_) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        stream_id,
                        frame_id,
                        "Processing deadline exceeded"
                    );
                    metrics::record_error("timeout");
                    verdict_actions(&Verdict::error(ErrorCode::Timeout), None)
                }
            };

            tracing::trace!(connection_id = %connection_id, stream_id, frame_id, actions = actions.len(), "Ack ready");
            let _ = tx.send(Frame::ack(stream_id, frame_id, actions)).await;
        });

        self.streams.insert(stream_id, task);
        Ok(())
    }

    /// Let in-flight streams finish within the shutdown grace period.
    async fn drain(&mut self) {
        let deadline = Instant::now() + self.config.shutdown_grace;
        let pending = self.streams.len();
        for (stream_id, mut task) in self.streams.drain() {
            if timeout_at(deadline, &mut task).await.is_err() {
                tracing::debug!(connection_id = %self.id, stream_id, "Aborting stream after grace period");
                task.abort();
            }
        }
        tracing::debug!(connection_id = %self.id, pending, "Streams drained");
    }

    /// Cancel in-flight streams so no ack can follow a disconnect.
    fn abort_streams(&mut self) {
        for (_, task) in self.streams.drain() {
            task.abort();
        }
    }

    async fn disconnect(&mut self, tx: &mpsc::Sender<Frame>, status: DisconnectStatus, message: &str) {
        self.transition(SessionState::Closing);
        send_disconnect(tx, status, message).await;
    }
}

/// Queue an AGENT-DISCONNECT, giving up if the writer stays full.
async fn send_disconnect(tx: &mpsc::Sender<Frame>, status: DisconnectStatus, message: &str) {
    let frame = Frame::agent_disconnect(status, message);
    if timeout(WRITER_FLUSH_TIMEOUT, tx.send(frame)).await.is_err() {
        tracing::debug!(status = status.code(), "Writer queue full, disconnect dropped");
    }
}

async fn process(correlator: &Correlator, messages: &[Message]) -> Vec<Action> {
    let mut actions = Vec::new();
    for message in messages {
        actions.extend(correlator.handle(message).await);
    }
    actions
}

fn log_proxy_disconnect(id: ConnectionId, frame: &Frame) {
    let items = frame.kv_list();
    let code = items
        .and_then(|i| i.get("status-code"))
        .and_then(TypedValue::as_i64)
        .unwrap_or(0);
    let message = items
        .and_then(|i| i.get("message"))
        .and_then(TypedValue::as_str)
        .unwrap_or("");
    tracing::info!(connection_id = %id, status_code = code, message, "Proxy sent disconnect");
}

async fn write_loop(mut writer: WriteHalf, mut rx: mpsc::Receiver<Frame>) -> Result<(), CodecError> {
    while let Some(frame) = rx.recv().await {
        write_frame(&mut writer, &frame).await?;
        metrics::record_frame(frame.kind.as_str(), "out");
    }
    writer.shutdown().await?;
    Ok(())
}
