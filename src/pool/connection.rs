//! Connection lifecycle state machine
//!
//! A [`Connection`] wraps one transport instance and tracks its place in the
//! pool lifecycle: `Connecting -> Idle <-> Active`, any state to `Broken` on
//! failure, and `Closed` once destroyed. Only the owning pool transitions a
//! connection between `Idle` and `Active`.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::transport::{Connector, Transport, TransportError};

/// Unique identifier for a connection within its pool
pub type ConnectionId = u64;

/// Consecutive transport errors that force a connection to `Broken`
/// independently of active health checks
pub const PASSIVE_ERROR_LIMIT: u32 = 3;

/// Lifecycle states of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport establishment in progress
    Connecting,
    /// Healthy and available for checkout
    Idle,
    /// Checked out by exactly one caller
    Active,
    /// Failed; will be destroyed, never handed out
    Broken,
    /// Destroyed; terminal
    Closed,
}

/// One pooled transport connection with lifecycle and usage tracking
pub struct Connection {
    id: ConnectionId,
    transport: Box<dyn Transport>,
    state: ConnectionState,
    created_at: Instant,
    last_used_at: Instant,
    usage_count: u64,
    consecutive_errors: u32,
}

impl Connection {
    /// Establish a transport to `address` and wrap it as an `Idle` connection
    ///
    /// The connect timeout is enforced here; exceeding it is reported the
    /// same way as a refused connection.
    pub async fn establish(
        id: ConnectionId,
        connector: &dyn Connector,
        address: &str,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        debug!(id = id, address = %address, "establishing connection");

        let transport = match tokio::time::timeout(
            connect_timeout,
            connector.connect(address, connect_timeout),
        )
        .await
        {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                warn!(id = id, address = %address, error = %e, "connect failed");
                return Err(e);
            }
            Err(_) => {
                warn!(id = id, address = %address, "connect timed out");
                return Err(TransportError::Timeout(connect_timeout));
            }
        };

        let now = Instant::now();
        Ok(Self {
            id,
            transport,
            state: ConnectionState::Idle,
            created_at: now,
            last_used_at: now,
            usage_count: 0,
            consecutive_errors: 0,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn is_broken(&self) -> bool {
        matches!(self.state, ConnectionState::Broken)
    }

    /// Send one payload; any transport error marks the connection `Broken`
    pub async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if !matches!(self.state, ConnectionState::Active | ConnectionState::Idle) {
            return Err(TransportError::Closed);
        }

        match self.transport.send(payload).await {
            Ok(()) => {
                self.consecutive_errors = 0;
                Ok(())
            }
            Err(e) => {
                self.record_error();
                Err(e)
            }
        }
    }

    /// Receive one payload with a bounded wait; errors mark the connection `Broken`
    pub async fn receive(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        if !matches!(self.state, ConnectionState::Active | ConnectionState::Idle) {
            return Err(TransportError::Closed);
        }

        match self.transport.receive(timeout).await {
            Ok(payload) => {
                self.consecutive_errors = 0;
                Ok(payload)
            }
            Err(e) => {
                self.record_error();
                Err(e)
            }
        }
    }

    /// Verify liveness of an `Idle` connection
    ///
    /// Consults the transport liveness predicate and, when `probe` is given,
    /// round-trips a synthetic payload within `timeout`. A false result
    /// leaves the connection `Broken`.
    pub async fn health_check(&mut self, probe: Option<&Bytes>, timeout: Duration) -> bool {
        if self.state != ConnectionState::Idle {
            return false;
        }

        if !self.transport.is_alive() {
            debug!(id = self.id, "liveness predicate failed");
            self.record_error();
            return false;
        }

        if let Some(probe) = probe {
            if self.send(probe.clone()).await.is_err() {
                return false;
            }
            if self.receive(timeout).await.is_err() {
                return false;
            }
        }

        true
    }

    /// Pool-only: hand the connection to a caller
    pub(crate) fn mark_active(&mut self) {
        debug_assert_eq!(self.state, ConnectionState::Idle);
        self.state = ConnectionState::Active;
        self.last_used_at = Instant::now();
        self.usage_count += 1;
    }

    /// Pool-only: return the connection to the available list
    pub(crate) fn mark_idle(&mut self) {
        if self.state == ConnectionState::Active {
            self.state = ConnectionState::Idle;
            self.last_used_at = Instant::now();
        }
    }

    /// Record a transport-level error observed by any caller (passive
    /// health detection)
    pub(crate) fn record_error(&mut self) {
        self.consecutive_errors += 1;
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Broken;
        }
        if self.consecutive_errors >= PASSIVE_ERROR_LIMIT {
            warn!(
                id = self.id,
                errors = self.consecutive_errors,
                "connection exceeded passive error limit"
            );
        }
    }

    /// Close the transport; terminal and idempotent
    pub async fn destroy(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.transport.close().await;
        self.state = ConnectionState::Closed;
        debug!(id = self.id, uses = self.usage_count, "connection destroyed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("usage_count", &self.usage_count)
            .field("consecutive_errors", &self.consecutive_errors)
            .finish()
    }
}
