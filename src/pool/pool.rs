//! Bounded per-backend connection pool
//!
//! One [`ConnectionPool`] owns every connection to a single backend. The
//! total never exceeds `max_connections`: checkout slots are guarded by a
//! fair semaphore, so waiting acquirers are served oldest-first, and a
//! connection is owned by exactly one [`PooledConnection`] guard between
//! acquire and release.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionId};
use crate::config::PoolSettings;
use crate::transport::{Connector, TransportError};

/// Error types for pool operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to connect to {address}: {source}")]
    ConnectFailed {
        address: String,
        source: TransportError,
    },

    #[error("transport I/O failed mid-use: {0}")]
    TransientIo(TransportError),

    #[error("no connection available within {0:?}")]
    AcquireTimeout(Duration),

    #[error("pool configuration prevents growth beyond {0} connections")]
    PoolExhausted(usize),

    #[error("pool is closed")]
    Closed,
}

/// Point-in-time pool metrics
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub total_connections: usize,
    pub idle_connections: usize,
    pub in_use_connections: usize,
    pub total_created: u64,
    pub total_reused: u64,
    pub total_destroyed: u64,
    pub connect_failures: u64,
    pub acquire_timeouts: u64,
}

#[derive(Default)]
struct PoolCounters {
    created: AtomicU64,
    reused: AtomicU64,
    destroyed: AtomicU64,
    connect_failures: AtomicU64,
    acquire_timeouts: AtomicU64,
}

/// Bounded pool of connections to one backend address
pub struct ConnectionPool {
    address: String,
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
    /// One permit per checkout slot; fair, so waiters are FIFO
    slots: Arc<Semaphore>,
    idle: Mutex<VecDeque<Connection>>,
    /// Connections that exist right now (idle + checked out)
    total: AtomicUsize,
    next_id: AtomicU64,
    shutdown: AtomicBool,
    counters: PoolCounters,
    /// Signalled when breakage drops the total below `min_connections`
    shrunk: Notify,
    /// Signalled when a connection is parked or a capacity slot frees up,
    /// waking an acquirer that holds a permit but found the pool at max
    parked: Notify,
}

impl ConnectionPool {
    /// Create a pool; connections are established lazily (see
    /// [`ConnectionPool::replenish`] for warm-up toward `min_connections`)
    pub fn new(address: String, connector: Arc<dyn Connector>, settings: PoolSettings) -> Arc<Self> {
        Arc::new(Self {
            address,
            connector,
            slots: Arc::new(Semaphore::new(settings.max_connections)),
            idle: Mutex::new(VecDeque::with_capacity(settings.max_connections)),
            settings,
            total: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
            counters: PoolCounters::default(),
            shrunk: Notify::new(),
            parked: Notify::new(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Connections currently alive (idle + in use)
    pub fn total_connections(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Connections currently checked out
    pub fn in_use(&self) -> usize {
        self.settings.max_connections - self.slots.available_permits()
    }

    /// Acquire a healthy connection, waiting at most `timeout`
    ///
    /// Unhealthy or expired idle connections found on the way are destroyed
    /// and skipped. When the pool is below `max_connections` and nothing
    /// idle survives, a fresh connection is established synchronously.
    pub async fn acquire(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<PooledConnection, PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        if self.settings.max_connections == 0 {
            return Err(PoolError::PoolExhausted(0));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let permit = match tokio::time::timeout_at(
            deadline,
            Arc::clone(&self.slots).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                self.counters.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
                debug!(backend = %self.address, timeout = ?timeout, "acquire timed out");
                return Err(PoolError::AcquireTimeout(timeout));
            }
        };

        loop {
            // Reuse an idle connection, discarding broken or expired ones
            // lazily
            let candidate = {
                let mut idle = self.idle.lock().await;
                idle.pop_front()
            };

            if let Some(mut conn) = candidate {
                // The liveness screen is the transport predicate only, no
                // I/O; probe round-trips stay in the health check sweeps
                if conn.is_broken()
                    || conn.idle_for() > self.settings.idle_timeout()
                    || conn.age() > self.settings.max_connection_age()
                    || !conn.health_check(None, Duration::ZERO).await
                {
                    debug!(
                        backend = %self.address,
                        id = conn.id(),
                        "discarding stale connection on acquire"
                    );
                    self.destroy_connection(&mut conn).await;
                    continue;
                }

                conn.mark_active();
                self.counters.reused.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledConnection::new(conn, Arc::clone(self), permit));
            }

            // Nothing idle: reserve a slot below max and create. The permit
            // bounds checked-out connections, the CAS bounds the total, so
            // a concurrent replenish can never overshoot.
            if !self.try_reserve_slot() {
                // A background creator or health sweep holds the last slot;
                // sleep until a connection is parked or a slot frees up
                // rather than spinning
                if tokio::time::timeout_at(deadline, self.parked.notified())
                    .await
                    .is_err()
                {
                    self.counters.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
                    debug!(backend = %self.address, timeout = ?timeout, "acquire timed out");
                    return Err(PoolError::AcquireTimeout(timeout));
                }
                if self.shutdown.load(Ordering::Acquire) {
                    return Err(PoolError::Closed);
                }
                continue;
            }

            let mut conn = self.establish_reserved().await.map_err(|source| {
                self.counters.connect_failures.fetch_add(1, Ordering::Relaxed);
                PoolError::ConnectFailed {
                    address: self.address.clone(),
                    source,
                }
            })?;

            conn.mark_active();
            return Ok(PooledConnection::new(conn, Arc::clone(self), permit));
        }
    }

    /// Reserve one slot in the total count, failing at `max_connections`
    fn try_reserve_slot(&self) -> bool {
        loop {
            let current = self.total.load(Ordering::Acquire);
            if current >= self.settings.max_connections {
                return false;
            }
            if self
                .total
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Establish a connection for an already-reserved slot
    async fn establish_reserved(&self) -> Result<Connection, TransportError> {
        let id: ConnectionId = self.next_id.fetch_add(1, Ordering::Relaxed);

        match Connection::establish(
            id,
            self.connector.as_ref(),
            &self.address,
            self.settings.connect_timeout(),
        )
        .await
        {
            Ok(conn) => {
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                info!(
                    backend = %self.address,
                    id = id,
                    total = self.total.load(Ordering::Acquire),
                    "created connection"
                );
                Ok(conn)
            }
            Err(e) => {
                self.total.fetch_sub(1, Ordering::AcqRel);
                self.parked.notify_one();
                Err(e)
            }
        }
    }

    /// Return a connection to the pool; broken connections are destroyed
    /// instead, and the pool re-creates toward `min_connections` in the
    /// background
    async fn release_connection(&self, mut conn: Connection) {
        if self.shutdown.load(Ordering::Acquire) {
            self.destroy_connection(&mut conn).await;
            return;
        }

        if conn.is_broken() {
            warn!(
                backend = %self.address,
                id = conn.id(),
                errors = conn.consecutive_errors(),
                "destroying broken connection on release"
            );
            self.destroy_connection(&mut conn).await;
            return;
        }

        conn.mark_idle();
        let mut idle = self.idle.lock().await;
        idle.push_back(conn);
        self.parked.notify_one();
        // The slot permit is dropped by the guard after this returns, waking
        // the oldest waiter, which will find the connection we just parked
    }

    async fn destroy_connection(&self, conn: &mut Connection) {
        conn.destroy().await;
        let remaining = self.total.fetch_sub(1, Ordering::AcqRel) - 1;
        self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
        self.parked.notify_one();
        if remaining < self.settings.min_connections {
            self.shrunk.notify_waiters();
        }
    }

    /// Wait until breakage drops the pool below `min_connections`
    ///
    /// Used by the reconnect task; callers should still poll, since a
    /// notification sent with no waiter registered is not queued.
    pub async fn wait_below_min(&self) {
        self.shrunk.notified().await;
    }

    /// Create connections until the pool holds `min_connections`, stopping
    /// at the first failure
    ///
    /// Best-effort: the caller (maintenance task) retries with backoff.
    pub async fn replenish(&self) -> Result<usize, PoolError> {
        let target = self.settings.min_connections;
        let mut added = 0;

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Err(PoolError::Closed);
            }

            // Reserve a slot below target so concurrent creators never
            // overshoot
            let current = self.total.load(Ordering::Acquire);
            if current >= target {
                break;
            }
            if self
                .total
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            let id: ConnectionId = self.next_id.fetch_add(1, Ordering::Relaxed);
            match Connection::establish(
                id,
                self.connector.as_ref(),
                &self.address,
                self.settings.connect_timeout(),
            )
            .await
            {
                Ok(conn) => {
                    self.counters.created.fetch_add(1, Ordering::Relaxed);
                    let mut idle = self.idle.lock().await;
                    idle.push_back(conn);
                    self.parked.notify_one();
                    added += 1;
                }
                Err(source) => {
                    self.total.fetch_sub(1, Ordering::AcqRel);
                    self.parked.notify_one();
                    self.counters.connect_failures.fetch_add(1, Ordering::Relaxed);
                    return Err(PoolError::ConnectFailed {
                        address: self.address.clone(),
                        source,
                    });
                }
            }
        }

        if added > 0 {
            debug!(backend = %self.address, added = added, "replenished pool");
        }
        Ok(added)
    }

    /// One eviction sweep: destroy idle connections past `idle_timeout` or
    /// `max_connection_age`, never shrinking below `min_connections`
    pub async fn evict(&self) {
        let mut evicted = 0;
        {
            let mut idle = self.idle.lock().await;
            let mut keep = VecDeque::with_capacity(idle.len());

            while let Some(mut conn) = idle.pop_front() {
                let expired = conn.idle_for() > self.settings.idle_timeout()
                    || conn.age() > self.settings.max_connection_age();
                let above_min =
                    self.total.load(Ordering::Acquire) > self.settings.min_connections;

                if (conn.is_broken() || expired) && (conn.is_broken() || above_min) {
                    self.destroy_connection(&mut conn).await;
                    evicted += 1;
                } else {
                    keep.push_back(conn);
                }
            }

            *idle = keep;
        }

        if evicted > 0 {
            debug!(
                backend = %self.address,
                evicted = evicted,
                remaining = self.total.load(Ordering::Acquire),
                "evicted idle connections"
            );
        }
    }

    /// Active health sweep over the idle set
    ///
    /// Each idle connection is checked (optionally with a probe payload and
    /// bounded reply wait); failures are destroyed. Returns how many
    /// connections were destroyed.
    pub async fn check_idle(&self, probe: Option<&Bytes>, timeout: Duration) -> usize {
        let mut parked: Vec<Connection> = {
            let mut idle = self.idle.lock().await;
            idle.drain(..).collect()
        };

        let mut destroyed = 0;
        let mut healthy = VecDeque::with_capacity(parked.len());

        for mut conn in parked.drain(..) {
            if conn.health_check(probe, timeout).await {
                healthy.push_back(conn);
            } else {
                warn!(
                    backend = %self.address,
                    id = conn.id(),
                    "idle connection failed health check"
                );
                self.destroy_connection(&mut conn).await;
                destroyed += 1;
            }
        }

        let mut idle = self.idle.lock().await;
        // Acquirers may have parked fresh connections while we held ours out
        for conn in healthy {
            idle.push_back(conn);
            self.parked.notify_one();
        }

        destroyed
    }

    /// Close the pool: destroy idle connections and fail waiting acquirers
    ///
    /// Checked-out connections are destroyed as their guards release them.
    pub async fn close(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.slots.close();

        let mut idle = self.idle.lock().await;
        while let Some(mut conn) = idle.pop_front() {
            self.destroy_connection(&mut conn).await;
        }
        // Acquirers parked on capacity must observe the shutdown flag
        self.parked.notify_waiters();
        info!(backend = %self.address, "pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Snapshot of pool counters and sizes
    pub async fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().await.len();
        let total = self.total.load(Ordering::Acquire);
        PoolStats {
            total_connections: total,
            idle_connections: idle,
            in_use_connections: total.saturating_sub(idle),
            total_created: self.counters.created.load(Ordering::Relaxed),
            total_reused: self.counters.reused.load(Ordering::Relaxed),
            total_destroyed: self.counters.destroyed.load(Ordering::Relaxed),
            connect_failures: self.counters.connect_failures.load(Ordering::Relaxed),
            acquire_timeouts: self.counters.acquire_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Exclusive checkout of one connection
///
/// Releases back to the pool on [`PooledConnection::release`] or on drop,
/// so a cancelled caller cannot leak its connection.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    fn new(conn: Connection, pool: Arc<ConnectionPool>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            conn: Some(conn),
            pool,
            permit: Some(permit),
        }
    }

    /// Return the connection to the pool
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release_connection(conn).await;
        }
        // Permit drops here, waking the oldest waiter
        self.permit.take();
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until release")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until release")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = Arc::clone(&self.pool);
            let permit = self.permit.take();
            tokio::spawn(async move {
                pool.release_connection(conn).await;
                drop(permit);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolSettings;
    use crate::testutil::{FlakyConnector, MemoryConnector};
    use std::collections::HashSet;

    fn settings(min: usize, max: usize) -> PoolSettings {
        PoolSettings {
            min_connections: min,
            max_connections: max,
            acquire_timeout_ms: 1_000,
            connect_timeout_ms: 1_000,
            idle_timeout_ms: 60_000,
            max_connection_age_ms: 600_000,
            health_check_interval_ms: 60_000,
        }
    }

    fn pool_with(min: usize, max: usize) -> Arc<ConnectionPool> {
        ConnectionPool::new(
            "mem://a".to_string(),
            Arc::new(MemoryConnector::new()),
            settings(min, max),
        )
    }

    #[tokio::test]
    async fn test_acquire_creates_and_reuses() {
        let pool = pool_with(0, 4);

        let conn = pool.acquire(Duration::from_millis(200)).await.unwrap();
        let first_id = conn.id();
        conn.release().await;

        let conn = pool.acquire(Duration::from_millis(200)).await.unwrap();
        assert_eq!(conn.id(), first_id);
        conn.release().await;

        let stats = pool.stats().await;
        assert_eq!(stats.total_created, 1);
        assert_eq!(stats.total_reused, 1);
    }

    #[tokio::test]
    async fn test_capacity_never_exceeds_max() {
        let pool = pool_with(0, 3);

        let mut guards = Vec::new();
        for _ in 0..3 {
            guards.push(pool.acquire(Duration::from_millis(200)).await.unwrap());
        }
        assert_eq!(pool.total_connections(), 3);
        assert_eq!(pool.in_use(), 3);

        // Pool is full: a fourth acquire must time out, not grow
        let result = pool.acquire(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(PoolError::AcquireTimeout(_))));
        assert_eq!(pool.total_connections(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_acquirers_get_distinct_connections() {
        let pool = pool_with(0, 4);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                let conn = pool.acquire(Duration::from_millis(500)).await.unwrap();
                let id = conn.id();
                tokio::time::sleep(Duration::from_millis(50)).await;
                conn.release().await;
                id
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        // Four simultaneous holders means four distinct connections
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn test_zero_capacity_pool_rejects_immediately() {
        let pool = pool_with(0, 0);
        let result = pool.acquire(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(PoolError::PoolExhausted(0))));
    }

    #[tokio::test]
    async fn test_acquire_timeout_bound() {
        let pool = pool_with(0, 1);
        let held = pool.acquire(Duration::from_millis(200)).await.unwrap();

        let start = std::time::Instant::now();
        let result = pool.acquire(Duration::from_millis(500)).await;
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(PoolError::AcquireTimeout(_))));
        assert!(elapsed >= Duration::from_millis(450));
        assert!(elapsed < Duration::from_millis(1_500));

        held.release().await;
    }

    #[tokio::test]
    async fn test_waiter_served_on_release() {
        let pool = pool_with(0, 1);
        let held = pool.acquire(Duration::from_millis(200)).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.acquire(Duration::from_millis(1_000)).await.map(|c| c.id())
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let held_id = held.id();
        held.release().await;

        let waited_id = waiter.await.unwrap().unwrap();
        assert_eq!(waited_id, held_id);
    }

    #[tokio::test]
    async fn test_acquirer_blocks_on_in_flight_background_connect() {
        // One slot, held by a background replenish that is still mid-connect:
        // the acquirer must park until the new connection lands, not burn CPU
        // retrying the reservation
        let pool = ConnectionPool::new(
            "mem://a".to_string(),
            Arc::new(MemoryConnector::with_connect_delay(Duration::from_millis(
                200,
            ))),
            settings(1, 1),
        );

        let replenisher = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.replenish().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.total_connections(), 1);

        let conn = pool.acquire(Duration::from_millis(1_000)).await.unwrap();
        assert_eq!(pool.total_connections(), 1);
        conn.release().await;

        assert_eq!(replenisher.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_acquirer_times_out_while_capacity_is_held() {
        // The background connect outlives the acquire deadline; the parked
        // acquirer must give up with a timeout instead of waiting forever
        let pool = ConnectionPool::new(
            "mem://a".to_string(),
            Arc::new(MemoryConnector::with_connect_delay(Duration::from_millis(
                500,
            ))),
            settings(1, 1),
        );

        let replenisher = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.replenish().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = pool.acquire(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(PoolError::AcquireTimeout(_))));

        replenisher.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_broken_connection_destroyed_on_release() {
        let connector = Arc::new(MemoryConnector::new());
        let pool = ConnectionPool::new(
            "mem://a".to_string(),
            Arc::clone(&connector) as Arc<dyn Connector>,
            settings(0, 2),
        );

        let mut conn = pool.acquire(Duration::from_millis(200)).await.unwrap();
        connector.kill_all();
        let _ = conn.send(Bytes::from_static(b"x")).await;
        assert!(conn.is_broken());
        conn.release().await;

        assert_eq!(pool.total_connections(), 0);
        let stats = pool.stats().await;
        assert_eq!(stats.total_destroyed, 1);
    }

    #[tokio::test]
    async fn test_replenish_reaches_min() {
        let pool = pool_with(2, 5);
        let added = pool.replenish().await.unwrap();
        assert_eq!(added, 2);
        assert_eq!(pool.total_connections(), 2);

        // Already at min: a second call is a no-op
        let added = pool.replenish().await.unwrap();
        assert_eq!(added, 0);
    }

    #[tokio::test]
    async fn test_replenish_reports_connect_failure() {
        let pool = ConnectionPool::new(
            "mem://down".to_string(),
            Arc::new(FlakyConnector::refusing()),
            settings(2, 5),
        );

        let result = pool.replenish().await;
        assert!(matches!(result, Err(PoolError::ConnectFailed { .. })));
        assert_eq!(pool.total_connections(), 0);
    }

    #[tokio::test]
    async fn test_eviction_stops_at_min() {
        let mut s = settings(2, 5);
        s.idle_timeout_ms = 10;
        let pool = ConnectionPool::new("mem://a".to_string(), Arc::new(MemoryConnector::new()), s);

        // Park 5 idle connections, let them all pass the idle threshold
        let mut guards = Vec::new();
        for _ in 0..5 {
            guards.push(pool.acquire(Duration::from_millis(200)).await.unwrap());
        }
        for guard in guards {
            guard.release().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        pool.evict().await;
        assert_eq!(pool.total_connections(), 2);

        // Never below min, even when everything is expired
        pool.evict().await;
        assert_eq!(pool.total_connections(), 2);
    }

    #[tokio::test]
    async fn test_check_idle_destroys_dead_connections() {
        let connector = Arc::new(MemoryConnector::new());
        let pool = ConnectionPool::new(
            "mem://a".to_string(),
            Arc::clone(&connector) as Arc<dyn Connector>,
            settings(0, 4),
        );

        let a = pool.acquire(Duration::from_millis(200)).await.unwrap();
        let b = pool.acquire(Duration::from_millis(200)).await.unwrap();
        a.release().await;
        b.release().await;
        assert_eq!(pool.total_connections(), 2);

        connector.kill_all();
        let destroyed = pool.check_idle(None, Duration::from_millis(50)).await;
        assert_eq!(destroyed, 2);
        assert_eq!(pool.total_connections(), 0);
    }

    #[tokio::test]
    async fn test_drop_guard_releases() {
        let pool = pool_with(0, 1);

        {
            let _conn = pool.acquire(Duration::from_millis(200)).await.unwrap();
            // Dropped without an explicit release
        }

        // The dropped guard hands its slot back asynchronously
        let conn = pool.acquire(Duration::from_millis(500)).await.unwrap();
        conn.release().await;
    }

    #[tokio::test]
    async fn test_close_fails_waiters_and_acquires() {
        let pool = pool_with(0, 1);
        let held = pool.acquire(Duration::from_millis(200)).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(Duration::from_millis(2_000)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        pool.close().await;
        assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));
        assert!(matches!(
            pool.acquire(Duration::from_millis(50)).await,
            Err(PoolError::Closed)
        ));

        held.release().await;
        assert_eq!(pool.total_connections(), 0);
    }
}
