use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// EWMA weight applied to each new latency sample, in percent
const LATENCY_SAMPLE_WEIGHT: u64 = 20;

/// Live metrics for one configured backend endpoint
///
/// Backends are configured at startup and never deleted, only marked
/// unavailable. Counters are mutated by many concurrent callers, so
/// everything here is atomic.
#[derive(Debug)]
pub struct Backend {
    /// Backend address, handed to the Connector
    pub address: String,

    /// Static weight for weighted strategies
    pub weight: u32,

    /// Administrative availability flag
    available: AtomicBool,

    /// Requests currently in flight against this backend
    active: AtomicU32,

    /// Total requests routed here
    total_requests: AtomicU64,

    /// Total failed requests
    total_errors: AtomicU64,

    /// Rolling average latency in microseconds (exponentially weighted)
    avg_latency_micros: AtomicU64,
}

impl Backend {
    pub fn new(address: String, weight: u32) -> Self {
        Self {
            address,
            weight,
            available: AtomicBool::new(true),
            active: AtomicU32::new(0),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            avg_latency_micros: AtomicU64::new(0),
        }
    }

    /// Count one request entering flight
    pub fn begin_request(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one request leaving flight
    pub fn end_request(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_count(&self) -> u32 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    /// Fold one observed latency into the rolling average
    ///
    /// Racy load/store is tolerated: samples are frequent and the average
    /// only steers load balancing.
    pub fn record_latency(&self, latency: Duration) {
        let sample = latency.as_micros() as u64;
        let current = self.avg_latency_micros.load(Ordering::Relaxed);
        let next = if current == 0 {
            sample
        } else {
            (current * (100 - LATENCY_SAMPLE_WEIGHT) + sample * LATENCY_SAMPLE_WEIGHT) / 100
        };
        self.avg_latency_micros.store(next, Ordering::Relaxed);
    }

    pub fn avg_latency(&self) -> Duration {
        Duration::from_micros(self.avg_latency_micros.load(Ordering::Relaxed))
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Administrative availability (distinct from circuit breaker gating)
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }
}

/// Metrics snapshot for one backend
#[derive(Debug, Clone)]
pub struct BackendStats {
    pub address: String,
    pub weight: u32,
    pub available: bool,
    pub active_requests: u32,
    pub total_requests: u64,
    pub total_errors: u64,
    pub avg_latency: Duration,
}

impl Backend {
    pub fn stats(&self) -> BackendStats {
        BackendStats {
            address: self.address.clone(),
            weight: self.weight,
            available: self.is_available(),
            active_requests: self.active_count(),
            total_requests: self.total_requests(),
            total_errors: self.total_errors(),
            avg_latency: self.avg_latency(),
        }
    }
}
