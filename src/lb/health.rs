use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::pool::{CircuitBreaker, ConnectionPool};

/// Active health checking across every backend pool
///
/// Two complementary mechanisms keep connections honest:
///
/// - **Passive**: every transport error observed during use is recorded on
///   the connection itself (see `Connection::record_error`), breaking it at
///   the moment of failure with no extra traffic.
/// - **Active**: this checker periodically sweeps each pool's idle
///   connections, catching peers that died silently while nothing was
///   using them, which passive checks would never observe. Failed
///   connections are destroyed and the pool is replenished toward its
///   minimum.
///
/// Replenishment is suppressed while a backend's circuit breaker rejects
/// traffic, so probing a dead backend stays bounded to the breaker's trial
/// requests.
pub struct HealthChecker {
    pools: Arc<Vec<Arc<ConnectionPool>>>,
    breakers: Arc<Vec<Arc<CircuitBreaker>>>,
    probe: Option<Bytes>,
    probe_timeout: Duration,
    interval: Duration,
}

impl HealthChecker {
    pub fn new(
        pools: Arc<Vec<Arc<ConnectionPool>>>,
        breakers: Arc<Vec<Arc<CircuitBreaker>>>,
        probe: Option<Bytes>,
        probe_timeout: Duration,
        interval: Duration,
    ) -> Self {
        debug_assert_eq!(pools.len(), breakers.len());
        Self {
            pools,
            breakers,
            probe,
            probe_timeout,
            interval,
        }
    }

    /// Start the periodic sweep task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_ms = self.interval.as_millis() as u64,
                pools = self.pools.len(),
                "health checker started"
            );

            loop {
                let start = Instant::now();
                self.sweep().await;
                debug!(
                    duration_ms = start.elapsed().as_millis() as u64,
                    "health check sweep completed"
                );
                sleep(self.interval).await;
            }
        })
    }

    /// Check every pool's idle connections once, in parallel
    pub async fn sweep(&self) {
        let mut handles = Vec::with_capacity(self.pools.len());

        for (pool, breaker) in self.pools.iter().zip(self.breakers.iter()) {
            let pool = Arc::clone(pool);
            let breaker = Arc::clone(breaker);
            let probe = self.probe.clone();
            let timeout = self.probe_timeout;

            handles.push(tokio::spawn(async move {
                let destroyed = pool.check_idle(probe.as_ref(), timeout).await;
                if destroyed == 0 {
                    return;
                }
                warn!(
                    backend = %pool.address(),
                    destroyed = destroyed,
                    "active health check removed connections"
                );
                if breaker.allows_traffic() {
                    if let Err(e) = pool.replenish().await {
                        warn!(backend = %pool.address(), error = %e, "replenish after health check failed");
                        breaker.record_failure();
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}
