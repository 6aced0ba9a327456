//! TCP and Unix listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address (`host:port` or `unix:///path`)
//! - Accept incoming connections
//! - Enforce max_connections limit via semaphore
//! - Graceful handling of accept errors

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::Semaphore;

use crate::config::BindAddress;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
    /// The connection limit semaphore was closed.
    Closed,
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
            ListenerError::Closed => write!(f, "Listener closed"),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Read half of an accepted connection.
pub type ReadHalf = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of an accepted connection.
pub type WriteHalf = Box<dyn AsyncWrite + Send + Unpin>;

/// Remote end of an accepted connection.
#[derive(Debug, Clone)]
pub enum PeerAddr {
    Tcp(SocketAddr),
    Unix,
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerAddr::Tcp(addr) => write!(f, "{}", addr),
            PeerAddr::Unix => write!(f, "unix"),
        }
    }
}

/// An accepted connection on either transport.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Stream {
    /// Split into owned halves so reader and writer can live in different tasks.
    pub fn into_split(self) -> (ReadHalf, WriteHalf) {
        match self {
            Stream::Tcp(stream) => {
                let _ = stream.set_nodelay(true);
                let (r, w) = stream.into_split();
                (Box::new(r), Box::new(w))
            }
            Stream::Unix(stream) => {
                let (r, w) = stream.into_split();
                (Box::new(r), Box::new(w))
            }
        }
    }
}

enum Inner {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

/// A bounded listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
pub struct Listener {
    inner: Inner,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    ///
    /// A stale Unix socket file left by a previous run is removed first.
    pub async fn bind(bind: &BindAddress, max_connections: usize) -> Result<Self, ListenerError> {
        let inner = match bind {
            BindAddress::Tcp(addr) => {
                let addr: SocketAddr = addr.parse().map_err(|e| {
                    ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
                })?;
                Inner::Tcp(TcpListener::bind(addr).await.map_err(ListenerError::Bind)?)
            }
            BindAddress::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path).map_err(ListenerError::Bind)?;
                }
                let listener = UnixListener::bind(path).map_err(ListenerError::Bind)?;
                Inner::Unix(listener, path.clone())
            }
        };

        let listener = Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        };

        tracing::info!(
            address = %listener.describe(),
            max_connections,
            "Listener bound"
        );

        Ok(listener)
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(Stream, PeerAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer) = match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, addr) = listener.accept().await.map_err(ListenerError::Accept)?;
                (Stream::Tcp(stream), PeerAddr::Tcp(addr))
            }
            Inner::Unix(listener, _) => {
                let (stream, _) = listener.accept().await.map_err(ListenerError::Accept)?;
                (Stream::Unix(stream), PeerAddr::Unix)
            }
        };

        tracing::debug!(
            peer_addr = %peer,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, peer, ConnectionPermit { _permit: permit }))
    }

    /// Get the local TCP address, if bound to TCP.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            Inner::Tcp(listener) => listener.local_addr().ok(),
            Inner::Unix(..) => None,
        }
    }

    /// Human-readable bound address.
    pub fn describe(&self) -> String {
        match &self.inner {
            Inner::Tcp(listener) => listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "tcp".to_string()),
            Inner::Unix(_, path) => format!("unix://{}", path.display()),
        }
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Inner::Unix(_, path) = &self.inner {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permits_bound_concurrent_connections() {
        let listener = Listener::bind(&BindAddress::Tcp("127.0.0.1:0".into()), 1)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let (_s1, _, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 0);

        drop(permit);
        assert_eq!(listener.available_permits(), 1);
    }

    #[tokio::test]
    async fn binds_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener = Listener::bind(&BindAddress::Unix(path.clone()), 4)
            .await
            .unwrap();
        assert_eq!(listener.describe(), format!("unix://{}", path.display()));

        let _client = UnixStream::connect(&path).await.unwrap();
        let (_stream, peer, _permit) = listener.accept().await.unwrap();
        assert!(matches!(peer, PeerAddr::Unix));

        drop(listener);
        assert!(!path.exists());
    }
}
