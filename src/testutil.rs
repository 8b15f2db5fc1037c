//! In-memory transports for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::transport::{Connector, Transport, TransportError};

/// Echo transport backed by an in-process buffer
///
/// Each transport remembers the connector epoch it was born in;
/// [`MemoryConnector::kill_all`] advances the epoch, permanently deadening
/// every transport opened before the kill.
pub struct MemoryTransport {
    born: u32,
    epoch: Arc<AtomicU32>,
    closed: bool,
    inbox: VecDeque<Bytes>,
}

impl MemoryTransport {
    fn peer_gone(&self) -> bool {
        self.epoch.load(Ordering::Relaxed) != self.born
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.peer_gone() {
            return Err(TransportError::SendFailed("peer gone".into()));
        }
        self.inbox.push_back(payload);
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.peer_gone() {
            return Err(TransportError::ReceiveFailed("peer gone".into()));
        }
        match self.inbox.pop_front() {
            Some(payload) => Ok(payload),
            None => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }

    fn is_alive(&self) -> bool {
        !self.closed && !self.peer_gone()
    }
}

/// Connector producing [`MemoryTransport`] instances
pub struct MemoryConnector {
    accepting: AtomicBool,
    epoch: Arc<AtomicU32>,
    connect_delay: Option<Duration>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self {
            accepting: AtomicBool::new(true),
            epoch: Arc::new(AtomicU32::new(0)),
            connect_delay: None,
        }
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every connect take `delay` before completing
    pub fn with_connect_delay(delay: Duration) -> Self {
        Self {
            connect_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Deaden every open transport and refuse new connects
    pub fn kill_all(&self) {
        self.epoch.fetch_add(1, Ordering::Relaxed);
        self.accepting.store(false, Ordering::Relaxed);
    }

    /// Accept connects again; transports killed earlier stay dead
    pub fn revive(&self) {
        self.accepting.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        _address: &str,
        _timeout: Duration,
    ) -> Result<Box<dyn Transport>, TransportError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.accepting.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectFailed("peer gone".into()));
        }
        Ok(Box::new(MemoryTransport {
            born: self.epoch.load(Ordering::Relaxed),
            epoch: Arc::clone(&self.epoch),
            closed: false,
            inbox: VecDeque::new(),
        }))
    }
}

/// Connector that refuses a configurable number of connect attempts before
/// delegating to a working [`MemoryConnector`]
pub struct FlakyConnector {
    inner: MemoryConnector,
    fail_remaining: AtomicU32,
}

impl FlakyConnector {
    /// Fail the first `n` connects, then succeed
    pub fn failing_first(n: u32) -> Self {
        Self {
            inner: MemoryConnector::new(),
            fail_remaining: AtomicU32::new(n),
        }
    }

    /// Refuse every connect attempt
    pub fn refusing() -> Self {
        Self::failing_first(u32::MAX)
    }
}

#[async_trait]
impl Connector for FlakyConnector {
    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let remaining = self.fail_remaining.load(Ordering::Relaxed);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.fail_remaining.fetch_sub(1, Ordering::Relaxed);
            }
            return Err(TransportError::ConnectFailed("refused".into()));
        }
        self.inner.connect(address, timeout).await
    }
}
