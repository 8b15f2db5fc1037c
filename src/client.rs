//! Resilient client façade
//!
//! Composes the load balancer, per-backend circuit breakers and connection
//! pools, the health checker, and the pending-request queue into one entry
//! point. On top of the composition it adds reconnection with exponential
//! backoff, heartbeat probing of idle connections, and session affinity
//! bookkeeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, Strategy};
use crate::lb::{Backend, BackendStats, HealthChecker, LoadBalancer, SelectError};
use crate::pool::{
    CircuitBreaker, CircuitError, CircuitStats, ConnectionPool, PoolError, PoolStats,
};
use crate::queue::{QueueError, QueueItem, RequestQueue};
use crate::transport::Connector;

/// Cadence of the queue drain task
const DRAIN_POLL: Duration = Duration::from_millis(500);

/// Fallback poll cadence for the per-backend reconnect task; breakage
/// normally wakes it immediately
const RECONNECT_POLL: Duration = Duration::from_secs(1);

/// Top-level error type surfaced by [`ResilientClient`]
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Circuit(#[from] CircuitError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("request failed after {0} attempts")]
    MaxRetriesExceeded(u32),
}

impl ClientError {
    /// Failures the client absorbs by buffering the request for retry;
    /// capacity errors (acquire timeout, open circuit, no backend) surface
    /// to the caller immediately instead. Heartbeat misses never reach the
    /// caller at all: the sweep destroys the connection and the pool
    /// replenishes.
    fn is_queueable(&self) -> bool {
        matches!(
            self,
            ClientError::Pool(PoolError::TransientIo(_))
                | ClientError::Pool(PoolError::ConnectFailed { .. })
        )
    }
}

/// Result of one execute call
#[derive(Debug)]
pub enum Outcome {
    /// The request ran and this is the reply payload
    Completed(Bytes),
    /// The request could not run now and was buffered for retry
    Queued,
}

/// Exponential backoff schedule with optional jitter
///
/// Delays follow `min(initial * multiplier^attempt, max)`; `reset` returns
/// to the first step after a successful reconnection.
pub struct Backoff {
    settings: crate::config::BackoffSettings,
    attempt: u32,
}

impl Backoff {
    pub fn new(settings: crate::config::BackoffSettings) -> Self {
        Self { settings, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the current attempt, then advance
    pub fn next_delay(&mut self) -> Duration {
        let base = self.settings.initial_ms as f64
            * self.settings.multiplier.powi(self.attempt.min(64) as i32);
        let capped = base.min(self.settings.max_ms as f64);

        let jittered = if self.settings.jitter > 0.0 {
            capped + capped * self.settings.jitter * rand::thread_rng().gen::<f64>()
        } else {
            capped
        };

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(jittered as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Session affinity binding for one caller key
struct SessionEntry {
    backend_index: usize,
    last_used: Instant,
}

/// Full metrics snapshot across backends
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub backends: Vec<BackendSnapshot>,
    pub queue_depth: usize,
    pub permanently_failed: u64,
}

#[derive(Debug, Clone)]
pub struct BackendSnapshot {
    pub backend: BackendStats,
    pub circuit: CircuitStats,
    pub pool: PoolStats,
}

/// Client-side entry point for executing work against a backend set
pub struct ResilientClient {
    config: ClientConfig,
    backends: Arc<Vec<Arc<Backend>>>,
    breakers: Arc<Vec<Arc<CircuitBreaker>>>,
    pools: Arc<Vec<Arc<ConnectionPool>>>,
    balancer: LoadBalancer,
    queue: Arc<RequestQueue>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    /// Registry of background task handles for coordinated shutdown
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    permanently_failed: AtomicU64,
    shutdown: AtomicBool,
}

impl ResilientClient {
    /// Build the composition; fails fast on invalid configuration
    ///
    /// No background work starts until [`ResilientClient::start`].
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Arc<Self>> {
        config.validate()?;

        let mut backends = Vec::with_capacity(config.backends.len());
        let mut breakers = Vec::with_capacity(config.backends.len());
        let mut pools = Vec::with_capacity(config.backends.len());

        for backend_config in &config.backends {
            backends.push(Arc::new(Backend::new(
                backend_config.address.clone(),
                backend_config.weight,
            )));
            breakers.push(Arc::new(CircuitBreaker::new(config.breaker.clone())));
            pools.push(ConnectionPool::new(
                backend_config.address.clone(),
                Arc::clone(&connector),
                config.pool.clone(),
            ));
        }

        let backends = Arc::new(backends);
        let breakers = Arc::new(breakers);
        let pools = Arc::new(pools);

        let balancer = LoadBalancer::new(
            Arc::clone(&backends),
            Arc::clone(&breakers),
            config.strategy,
        );
        let queue = Arc::new(RequestQueue::new(
            config.queue.max_size,
            config.queue.max_retries,
        ));

        info!(
            backends = config.backends.len(),
            strategy = ?config.strategy,
            "resilient client created"
        );

        Ok(Arc::new(Self {
            config,
            backends,
            breakers,
            pools,
            balancer,
            queue,
            sessions: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            permanently_failed: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }))
    }

    /// Warm the pools and start background tasks: active health checking,
    /// heartbeat probing, eviction, per-backend reconnection, queue drain
    pub async fn start(self: &Arc<Self>) {
        // Best-effort warm-up toward min_connections
        for (pool, breaker) in self.pools.iter().zip(self.breakers.iter()) {
            if let Err(e) = pool.replenish().await {
                warn!(backend = %pool.address(), error = %e, "warm-up failed");
                breaker.record_failure();
            }
        }

        let mut tasks = self.tasks.lock().expect("task registry lock poisoned");

        // Active health checking: liveness predicate only
        let health = Arc::new(HealthChecker::new(
            Arc::clone(&self.pools),
            Arc::clone(&self.breakers),
            None,
            self.config.heartbeat.timeout(),
            self.config.pool.health_check_interval(),
        ));
        tasks.push(health.start());

        // Heartbeat: application-level probe with a bounded reply wait,
        // catching hangs that transport-level keepalive cannot see
        let heartbeat = Arc::new(HealthChecker::new(
            Arc::clone(&self.pools),
            Arc::clone(&self.breakers),
            self.config.heartbeat.probe.clone().map(Bytes::from),
            self.config.heartbeat.timeout(),
            self.config.heartbeat.interval(),
        ));
        tasks.push(heartbeat.start());

        tasks.push(self.spawn_eviction_task());
        for index in 0..self.pools.len() {
            tasks.push(self.spawn_reconnect_task(index));
        }
        tasks.push(self.spawn_drain_task());

        info!(tasks = tasks.len(), "background tasks started");
    }

    /// Execute one request with default routing and priority
    pub async fn execute(&self, payload: Bytes) -> Result<Outcome, ClientError> {
        self.execute_with(None, payload, 0).await
    }

    /// Execute one request
    ///
    /// `session_key` pins routing under the session affinity strategy and
    /// is ignored otherwise. Transient transport failures are buffered into
    /// the request queue (returning [`Outcome::Queued`]) when a retry
    /// budget is configured; capacity errors surface immediately. Every
    /// suspension point is bounded, so this never blocks indefinitely.
    pub async fn execute_with(
        &self,
        session_key: Option<&str>,
        payload: Bytes,
        priority: i32,
    ) -> Result<Outcome, ClientError> {
        match self.try_once(session_key, payload.clone()).await {
            Ok(reply) => Ok(Outcome::Completed(reply)),
            Err(e) if e.is_queueable() && self.config.queue.max_retries > 0 => {
                debug!(error = %e, "buffering failed request for retry");
                self.queue.enqueue(
                    payload,
                    priority,
                    session_key.map(String::from),
                    None,
                )?;
                Ok(Outcome::Queued)
            }
            Err(e) => Err(e),
        }
    }

    /// One routed attempt: select, guard, acquire, send, receive, release
    async fn try_once(&self, session_key: Option<&str>, payload: Bytes) -> Result<Bytes, ClientError> {
        let index = match (self.config.strategy, session_key) {
            (Strategy::SessionAffinity, Some(key)) => self.session_backend(key)?,
            _ => self.balancer.select_with_key(session_key)?,
        };

        let backend = &self.backends[index];
        let breaker = &self.breakers[index];
        let pool = &self.pools[index];

        breaker.check_request()?;
        backend.begin_request();
        let start = Instant::now();

        let result = self.round_trip(pool, payload).await;

        backend.end_request();
        match result {
            Ok(reply) => {
                breaker.record_success();
                backend.record_latency(start.elapsed());
                Ok(reply)
            }
            Err(
                e @ (ClientError::Pool(PoolError::AcquireTimeout(_))
                | ClientError::Pool(PoolError::Closed)),
            ) => {
                // Says nothing about backend health, only local capacity
                breaker.record_abandoned();
                Err(e)
            }
            Err(e) => {
                breaker.record_failure();
                backend.record_error();
                Err(e)
            }
        }
    }

    async fn round_trip(
        &self,
        pool: &Arc<ConnectionPool>,
        payload: Bytes,
    ) -> Result<Bytes, ClientError> {
        let mut conn = pool.acquire(self.config.pool.acquire_timeout()).await?;

        if let Err(e) = conn.send(payload).await {
            // The connection is marked broken; release destroys it
            conn.release().await;
            return Err(ClientError::Pool(PoolError::TransientIo(e)));
        }

        match conn.receive(self.config.receive_timeout()).await {
            Ok(reply) => {
                conn.release().await;
                Ok(reply)
            }
            Err(e) => {
                conn.release().await;
                Err(ClientError::Pool(PoolError::TransientIo(e)))
            }
        }
    }

    /// Resolve a session key to its pinned backend, rebinding when the
    /// pinned backend is no longer eligible
    fn session_backend(&self, key: &str) -> Result<usize, SelectError> {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");

        if let Some(entry) = sessions.get_mut(key) {
            let index = entry.backend_index;
            if self.backends[index].is_available() && self.breakers[index].allows_traffic() {
                entry.last_used = Instant::now();
                return Ok(index);
            }
            sessions.remove(key);
        }

        let index = self.balancer.select_with_key(Some(key))?;
        sessions.insert(
            key.to_string(),
            SessionEntry {
                backend_index: index,
                last_used: Instant::now(),
            },
        );
        Ok(index)
    }

    /// Retry executor used by the queue drain task
    async fn run_queued(&self, item: QueueItem) -> Result<(), QueueItem> {
        let key = item.session_key.clone();
        match self.try_once(key.as_deref(), item.payload.clone()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!(error = %e, retries = item.retry_count, "queued request failed");
                Err(item)
            }
        }
    }

    fn spawn_eviction_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let interval = client.config.pool.health_check_interval();
            loop {
                sleep(interval).await;
                for pool in client.pools.iter() {
                    pool.evict().await;
                }
                client.expire_sessions();
            }
        })
    }

    /// One pass of the reconnect loop for one backend; returns `false`
    /// once the pool is gone and the loop should stop
    ///
    /// Attempts go through [`CircuitBreaker::check_request`], the same
    /// admission path requests use. Against a half-open circuit a replenish
    /// therefore spends one trial slot: its outcome moves the success
    /// streak, and a slot claimed by an in-flight request can never be
    /// released by an unrelated reconnect.
    async fn reconnect_step(&self, index: usize, backoff: &mut Backoff) -> bool {
        let pool = &self.pools[index];
        let breaker = &self.breakers[index];

        if pool.is_closed() {
            return false;
        }
        if pool.total_connections() >= pool.settings().min_connections {
            backoff.reset();
            return true;
        }
        if breaker.check_request().is_err() {
            return true;
        }

        match pool.replenish().await {
            Ok(added) => {
                if added > 0 {
                    info!(backend = %pool.address(), added = added, "reconnected");
                    breaker.record_success();
                } else {
                    // Raced another replenisher; no connect was attempted
                    breaker.record_abandoned();
                }
                backoff.reset();
                true
            }
            Err(PoolError::Closed) => {
                breaker.record_abandoned();
                false
            }
            Err(e) => {
                breaker.record_failure();
                let delay = backoff.next_delay();
                warn!(
                    backend = %pool.address(),
                    error = %e,
                    attempt = backoff.attempt(),
                    retry_in_ms = delay.as_millis() as u64,
                    "reconnect failed"
                );
                sleep(delay).await;
                true
            }
        }
    }

    /// Reconnection with backoff for one backend
    ///
    /// Wakes when the pool drops below its minimum, then re-creates
    /// connections. Failed attempts are spaced by the backoff schedule;
    /// success resets it. The circuit breaker gates attempts, so only its
    /// trial budget reaches a backend that is known-bad.
    fn spawn_reconnect_task(self: &Arc<Self>, index: usize) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let pool = Arc::clone(&client.pools[index]);
            let mut backoff = Backoff::new(client.config.backoff.clone());

            loop {
                tokio::select! {
                    _ = pool.wait_below_min() => {}
                    _ = sleep(RECONNECT_POLL) => {}
                }
                if !client.reconnect_step(index, &mut backoff).await {
                    break;
                }
            }
        })
    }

    fn spawn_drain_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                sleep(DRAIN_POLL).await;
                if client.queue.is_empty() {
                    continue;
                }
                let report = client.queue.drain(|item| client.run_queued(item)).await;
                if !report.failed.is_empty() {
                    client
                        .permanently_failed
                        .fetch_add(report.failed.len() as u64, Ordering::Relaxed);
                    for item in &report.failed {
                        warn!(
                            priority = item.priority,
                            error = %ClientError::MaxRetriesExceeded(item.retry_count),
                            "request dropped"
                        );
                    }
                }
            }
        })
    }

    fn expire_sessions(&self) {
        let timeout = self.config.session_idle_timeout();
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_used.elapsed() < timeout);
        let expired = before - sessions.len();
        if expired > 0 {
            debug!(expired = expired, "expired idle sessions");
        }
    }

    /// Administrative: mark a backend unavailable / available again
    pub fn set_backend_available(&self, index: usize, available: bool) {
        if let Some(backend) = self.backends.get(index) {
            info!(backend = %backend.address, available = available, "availability changed");
            backend.set_available(available);
        }
    }

    /// Administrative: force a backend's circuit closed
    pub fn reset_circuit(&self, index: usize) {
        if let Some(breaker) = self.breakers.get(index) {
            breaker.reset();
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Per-backend and per-pool metrics snapshot
    pub async fn stats(&self) -> ClientStats {
        let mut snapshots = Vec::with_capacity(self.backends.len());
        for index in 0..self.backends.len() {
            snapshots.push(BackendSnapshot {
                backend: self.backends[index].stats(),
                circuit: self.breakers[index].stats(),
                pool: self.pools[index].stats().await,
            });
        }
        ClientStats {
            backends: snapshots,
            queue_depth: self.queue.len(),
            permanently_failed: self.permanently_failed.load(Ordering::Relaxed),
        }
    }

    /// Stop background tasks and close every pool; idempotent
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let tasks = {
            let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            task.abort();
        }

        for pool in self.pools.iter() {
            pool.close().await;
        }
        info!("client shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffSettings;
    use crate::testutil::{FlakyConnector, MemoryConnector};

    fn test_config(addresses: &[&str]) -> ClientConfig {
        let mut config = ClientConfig::for_backends(addresses.iter().copied());
        config.pool.min_connections = 0;
        config.pool.max_connections = 4;
        config.pool.acquire_timeout_ms = 500;
        config.pool.connect_timeout_ms = 500;
        config.receive_timeout_ms = 500;
        config
    }

    #[test]
    fn test_backoff_sequence_capped_and_monotonic() {
        let mut backoff = Backoff::new(BackoffSettings {
            initial_ms: 1_000,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.0,
        });

        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(BackoffSettings::default());
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let mut backoff = Backoff::new(BackoffSettings {
            initial_ms: 1_000,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.5,
        });

        for expected_base in [1_000u64, 2_000, 4_000] {
            let delay = backoff.next_delay().as_millis() as u64;
            assert!(delay >= expected_base);
            assert!(delay <= expected_base + expected_base / 2);
        }
    }

    #[test]
    fn test_queueable_classification() {
        use crate::transport::TransportError;

        let transient = ClientError::Pool(PoolError::TransientIo(TransportError::Closed));
        assert!(transient.is_queueable());

        let connect = ClientError::Pool(PoolError::ConnectFailed {
            address: "mem://a".to_string(),
            source: TransportError::Closed,
        });
        assert!(connect.is_queueable());

        let capacity = ClientError::Pool(PoolError::AcquireTimeout(Duration::from_secs(1)));
        assert!(!capacity.is_queueable());
        let open = ClientError::Circuit(CircuitError::CircuitOpen(Duration::ZERO));
        assert!(!open.is_queueable());
        let empty = ClientError::Select(SelectError::NoAvailableBackend);
        assert!(!empty.is_queueable());
    }

    #[tokio::test]
    async fn test_reconnect_spends_half_open_trial() {
        let mut config = test_config(&["mem://a"]);
        config.pool.min_connections = 1;
        config.breaker.failure_threshold = 1;
        config.breaker.success_threshold = 1;
        config.breaker.half_open_max_requests = 1;
        config.breaker.open_timeout_ms = 0;
        let client = ResilientClient::new(config, Arc::new(MemoryConnector::new())).unwrap();

        client.breakers[0].record_failure();
        assert_eq!(client.breakers[0].state(), crate::pool::CircuitState::Open);

        // The reconnect pass is admitted as the half-open trial; its
        // successful connect legitimately closes the circuit
        let mut backoff = Backoff::new(client.config.backoff.clone());
        assert!(client.reconnect_step(0, &mut backoff).await);
        assert_eq!(client.pools[0].total_connections(), 1);
        assert_eq!(
            client.breakers[0].state(),
            crate::pool::CircuitState::Closed
        );

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnect_cannot_take_claimed_trial_slot() {
        let mut config = test_config(&["mem://a"]);
        config.pool.min_connections = 1;
        config.breaker.failure_threshold = 1;
        config.breaker.success_threshold = 2;
        config.breaker.half_open_max_requests = 1;
        config.breaker.open_timeout_ms = 0;
        let client = ResilientClient::new(config, Arc::new(MemoryConnector::new())).unwrap();

        client.breakers[0].record_failure();
        // A live request claims the only half-open trial slot
        client.breakers[0].check_request().unwrap();
        assert_eq!(
            client.breakers[0].state(),
            crate::pool::CircuitState::HalfOpen
        );

        // The reconnect pass is refused admission instead of borrowing the
        // slot or advancing the success streak
        let mut backoff = Backoff::new(client.config.backoff.clone());
        assert!(client.reconnect_step(0, &mut backoff).await);
        assert_eq!(client.pools[0].total_connections(), 0);
        assert!(client.breakers[0].check_request().is_err());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_round_trip() {
        let config = test_config(&["mem://a", "mem://b"]);
        let client = ResilientClient::new(config, Arc::new(MemoryConnector::new())).unwrap();

        let outcome = client.execute(Bytes::from_static(b"hello")).await.unwrap();
        match outcome {
            Outcome::Completed(reply) => assert_eq!(reply, Bytes::from_static(b"hello")),
            Outcome::Queued => panic!("expected a completed round trip"),
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_queues_on_transient_failure() {
        let config = test_config(&["mem://down"]);
        let client = ResilientClient::new(config, Arc::new(FlakyConnector::refusing())).unwrap();

        let outcome = client.execute(Bytes::from_static(b"x")).await.unwrap();
        assert!(matches!(outcome, Outcome::Queued));
        assert_eq!(client.queue_depth(), 1);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_surfaces_open_circuit() {
        let mut config = test_config(&["mem://down"]);
        config.breaker.failure_threshold = 1;
        config.queue.max_retries = 0;
        let client = ResilientClient::new(config, Arc::new(FlakyConnector::refusing())).unwrap();

        // First attempt fails and opens the circuit
        let result = client.execute(Bytes::from_static(b"x")).await;
        assert!(result.is_err());

        // With a single backend now excluded, selection fails fast
        let result = client.execute(Bytes::from_static(b"x")).await;
        assert!(matches!(
            result,
            Err(ClientError::Select(SelectError::NoAvailableBackend))
        ));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_streak_opens_circuit() {
        let mut config = test_config(&["mem://down", "mem://alive"]);
        config.breaker.failure_threshold = 3;
        config.queue.max_retries = 0;
        let client = ResilientClient::new(config, Arc::new(FlakyConnector::refusing())).unwrap();

        for _ in 0..6 {
            let _ = client.execute(Bytes::from_static(b"x")).await;
        }

        let stats = client.stats().await;
        assert!(stats
            .backends
            .iter()
            .all(|s| s.circuit.state == crate::pool::CircuitState::Open));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_session_affinity_binding_and_expiry() {
        let mut config = test_config(&["mem://a", "mem://b", "mem://c"]);
        config.strategy = Strategy::SessionAffinity;
        config.session_idle_timeout_ms = 0;
        let client = ResilientClient::new(config, Arc::new(MemoryConnector::new())).unwrap();

        client
            .execute_with(Some("caller-7"), Bytes::from_static(b"x"), 0)
            .await
            .unwrap();
        let bound = {
            let sessions = client.sessions.lock().unwrap();
            sessions.get("caller-7").unwrap().backend_index
        };

        for _ in 0..5 {
            client
                .execute_with(Some("caller-7"), Bytes::from_static(b"x"), 0)
                .await
                .unwrap();
            let sessions = client.sessions.lock().unwrap();
            assert_eq!(sessions.get("caller-7").unwrap().backend_index, bound);
        }

        // Zero idle timeout: the binding is dropped by the next sweep
        client.expire_sessions();
        assert!(client.sessions.lock().unwrap().is_empty());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_stats_snapshot_shape() {
        let config = test_config(&["mem://a", "mem://b"]);
        let client = ResilientClient::new(config, Arc::new(MemoryConnector::new())).unwrap();

        client.execute(Bytes::from_static(b"x")).await.unwrap();

        let stats = client.stats().await;
        assert_eq!(stats.backends.len(), 2);
        assert_eq!(stats.queue_depth, 0);
        let total_requests: u64 = stats.backends.iter().map(|s| s.backend.total_requests).sum();
        assert_eq!(total_requests, 1);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_construction() {
        let mut config = test_config(&["mem://a"]);
        config.pool.min_connections = 10;
        config.pool.max_connections = 2;

        let result = ResilientClient::new(config, Arc::new(MemoryConnector::new()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let config = test_config(&["mem://a"]);
        let client = ResilientClient::new(config, Arc::new(MemoryConnector::new())).unwrap();
        client.start().await;

        client.shutdown().await;
        client.shutdown().await;

        let result = client.execute(Bytes::from_static(b"x")).await;
        assert!(result.is_err());
    }
}
