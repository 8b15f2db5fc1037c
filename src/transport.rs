//! Transport abstraction consumed by the connection pool
//!
//! The core never opens sockets itself. Callers supply a [`Connector`] that
//! produces [`Transport`] instances; framing and payload interpretation stay
//! on the caller's side of this seam.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

/// Errors reported by a transport implementation
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bidirectional byte channel to one remote peer
///
/// Payload bytes are opaque to the pool; implementations own framing,
/// serialization and any handshake.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one opaque payload
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Receive one opaque payload, waiting at most `timeout`
    async fn receive(&mut self, timeout: Duration) -> Result<Bytes, TransportError>;

    /// Close the channel; subsequent calls must fail with [`TransportError::Closed`]
    async fn close(&mut self);

    /// Cheap liveness predicate (no I/O)
    fn is_alive(&self) -> bool;
}

/// Factory that opens transports to a backend address
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a transport to `address`, bounded by `timeout`
    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>, TransportError>;
}
