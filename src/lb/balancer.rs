use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;

use super::backend::Backend;
use crate::config::Strategy;
use crate::pool::CircuitBreaker;

/// Backend selection error
#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("no available backend: all excluded by circuit breaker or marked unavailable")]
    NoAvailableBackend,
}

/// Distributes requests across backends using the configured strategy
///
/// Every strategy excludes backends whose circuit breaker currently rejects
/// traffic, plus backends administratively marked unavailable. Backends and
/// breakers are parallel arrays in configuration order.
pub struct LoadBalancer {
    backends: Arc<Vec<Arc<Backend>>>,
    breakers: Arc<Vec<Arc<CircuitBreaker>>>,
    strategy: Strategy,
    /// Round-robin cursor; every probe consumes one position, so a skipped
    /// backend's share does not pile onto the index after it
    cursor: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(
        backends: Arc<Vec<Arc<Backend>>>,
        breakers: Arc<Vec<Arc<CircuitBreaker>>>,
        strategy: Strategy,
    ) -> Self {
        debug_assert_eq!(backends.len(), breakers.len());
        Self {
            backends,
            breakers,
            strategy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub fn backend(&self, index: usize) -> Option<&Arc<Backend>> {
        self.backends.get(index)
    }

    fn eligible(&self, index: usize) -> bool {
        self.backends[index].is_available() && self.breakers[index].allows_traffic()
    }

    /// Select a backend index using the configured strategy
    pub fn select(&self) -> Result<usize, SelectError> {
        self.select_with_key(None)
    }

    /// Select a backend index; `key` drives session affinity when that
    /// strategy is configured and is ignored otherwise
    pub fn select_with_key(&self, key: Option<&str>) -> Result<usize, SelectError> {
        if self.backends.is_empty() {
            return Err(SelectError::NoAvailableBackend);
        }

        match self.strategy {
            Strategy::RoundRobin => self.select_round_robin(),
            Strategy::LeastConnections => self.select_least_connections(),
            Strategy::WeightedRoundRobin => self.select_weighted(),
            Strategy::LeastResponseTime => self.select_least_response_time(),
            Strategy::PowerOfTwo => self.select_power_of_two(),
            Strategy::SessionAffinity => match key {
                Some(key) => self.select_by_key(key),
                None => self.select_round_robin(),
            },
        }
    }

    /// Round-robin: advance the cursor until it lands on an eligible
    /// backend, at most one full rotation
    ///
    /// Every candidate inspected consumes a cursor position. Scanning
    /// ahead of a fixed start instead would hand a skipped backend's
    /// turns to its successor, doubling that backend's share.
    fn select_round_robin(&self) -> Result<usize, SelectError> {
        let len = self.backends.len();
        for _ in 0..len {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            if self.eligible(index) {
                return Ok(index);
            }
        }
        Err(SelectError::NoAvailableBackend)
    }

    /// Least-connections: fewest in-flight requests, ties broken by cursor
    /// order
    fn select_least_connections(&self) -> Result<usize, SelectError> {
        let len = self.backends.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;

        let mut best: Option<(usize, u32)> = None;
        for offset in 0..len {
            let index = (start + offset) % len;
            if !self.eligible(index) {
                continue;
            }
            let active = self.backends[index].active_count();
            // Strict comparison keeps the earliest candidate in cursor
            // order on ties
            if best.map_or(true, |(_, min)| active < min) {
                best = Some((index, active));
            }
        }

        best.map(|(index, _)| index).ok_or(SelectError::NoAvailableBackend)
    }

    /// Weighted round-robin as weighted random selection: draw uniformly
    /// over the weight sum and subtract until the owner is found
    fn select_weighted(&self) -> Result<usize, SelectError> {
        let eligible: Vec<usize> = (0..self.backends.len())
            .filter(|&i| self.eligible(i))
            .collect();
        if eligible.is_empty() {
            return Err(SelectError::NoAvailableBackend);
        }

        let total: u64 = eligible
            .iter()
            .map(|&i| u64::from(self.backends[i].weight))
            .sum();
        if total == 0 {
            // Every eligible backend carries weight zero; degrade to a
            // uniform draw rather than an empty range
            let pick = rand::thread_rng().gen_range(0..eligible.len());
            return Ok(eligible[pick]);
        }

        let mut draw = rand::thread_rng().gen_range(0..total);
        for &index in &eligible {
            let weight = u64::from(self.backends[index].weight);
            if draw < weight {
                return Ok(index);
            }
            draw -= weight;
        }
        // Unreachable: draw < total by construction
        Ok(eligible[0])
    }

    /// Least-response-time: lowest rolling average latency, ties broken by
    /// least-connections
    fn select_least_response_time(&self) -> Result<usize, SelectError> {
        let mut best: Option<(usize, u128, u32)> = None;
        for index in 0..self.backends.len() {
            if !self.eligible(index) {
                continue;
            }
            let latency = self.backends[index].avg_latency().as_micros();
            let active = self.backends[index].active_count();
            let better = match best {
                None => true,
                Some((_, min_latency, min_active)) => {
                    latency < min_latency || (latency == min_latency && active < min_active)
                }
            };
            if better {
                best = Some((index, latency, active));
            }
        }

        best.map(|(index, _, _)| index).ok_or(SelectError::NoAvailableBackend)
    }

    /// Power-of-two-choices: two uniform samples among eligible backends,
    /// keep the one with fewer in-flight requests
    fn select_power_of_two(&self) -> Result<usize, SelectError> {
        let eligible: Vec<usize> = (0..self.backends.len())
            .filter(|&i| self.eligible(i))
            .collect();

        match eligible.len() {
            0 => Err(SelectError::NoAvailableBackend),
            1 => Ok(eligible[0]),
            len => {
                let mut rng = rand::thread_rng();
                let a = eligible[rng.gen_range(0..len)];
                let b = eligible[rng.gen_range(0..len)];
                if self.backends[a].active_count() <= self.backends[b].active_count() {
                    Ok(a)
                } else {
                    Ok(b)
                }
            }
        }
    }

    /// Session affinity: deterministic hash of the caller key; an
    /// ineligible mapped backend falls back to round-robin
    fn select_by_key(&self, key: &str) -> Result<usize, SelectError> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.backends.len() as u64) as usize;

        if self.eligible(index) {
            Ok(index)
        } else {
            self.select_round_robin()
        }
    }
}
