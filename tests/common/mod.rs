//! Shared in-process transport for integration tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use wirepool::{Connector, Transport, TransportError};

/// Echo transport pinned to the backend epoch it was opened in
///
/// Killing a backend advances its epoch, so transports opened before the
/// kill stay dead even after the backend is revived.
pub struct EchoTransport {
    born: u32,
    epoch: Arc<AtomicU32>,
    closed: bool,
    inbox: VecDeque<Bytes>,
}

impl EchoTransport {
    fn peer_gone(&self) -> bool {
        self.epoch.load(Ordering::Relaxed) != self.born
    }
}

#[async_trait]
impl Transport for EchoTransport {
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

struct BackendState {
    accepting: Arc<AtomicBool>,
    epoch: Arc<AtomicU32>,
    connects: Arc<AtomicU32>,
}

impl Default for BackendState {
    fn default() -> Self {
        Self {
            accepting: Arc::new(AtomicBool::new(true)),
            epoch: Arc::new(AtomicU32::new(0)),
            connects: Arc::new(AtomicU32::new(0)),
        }
    }
}

/// Connector simulating a set of independent backend endpoints
///
/// Each address fails and recovers on its own, so tests can take one
/// backend down while the rest keep serving.
#[derive(Default)]
pub struct TestNetwork {
    backends: Mutex<HashMap<String, BackendState>>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn state<R>(&self, address: &str, f: impl FnOnce(&BackendState) -> R) -> R {
        let mut backends = self.backends.lock().unwrap();
        let state = backends.entry(address.to_string()).or_default();
        f(state)
    }

    /// Take one backend down: new connects fail, open transports break
    pub fn kill(&self, address: &str) {
        self.state(address, |s| {
            s.epoch.fetch_add(1, Ordering::Relaxed);
            s.accepting.store(false, Ordering::Relaxed);
        });
    }

    /// Bring a backend back; transports killed earlier stay dead
    pub fn revive(&self, address: &str) {
        self.state(address, |s| s.accepting.store(true, Ordering::Relaxed));
    }

    pub fn connect_count(&self, address: &str) -> u32 {
        self.state(address, |s| s.connects.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl Connector for TestNetwork {
    async fn connect(
        &self,
        address: &str,
        _timeout: Duration,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let (accepting, epoch, connects) = self.state(address, |s| {
            (
                Arc::clone(&s.accepting),
                Arc::clone(&s.epoch),
                Arc::clone(&s.connects),
            )
        });

        connects.fetch_add(1, Ordering::Relaxed);
        if !accepting.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectFailed(format!(
                "{address} unreachable"
            )));
        }

        Ok(Box::new(EchoTransport {
            born: epoch.load(Ordering::Relaxed),
            epoch,
            closed: false,
            inbox: VecDeque::new(),
        }))
    }
}
