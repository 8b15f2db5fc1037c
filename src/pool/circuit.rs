//! Circuit breaker, one instance per backend
//!
//! Three states drive traffic gating:
//! - Closed: requests pass; consecutive failures are counted
//! - Open: requests fail fast until the retry deadline
//! - HalfOpen: a bounded number of trial requests probe for recovery
//!
//! While Open, nothing reaches the transport; the breaker also gates
//! reconnection and heartbeat probes, so recovery traffic is limited to the
//! HalfOpen trials.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::BreakerSettings;

/// Circuit breaker error types
#[derive(Debug, thiserror::Error)]
pub enum CircuitError {
    #[error("circuit open, retry in {0:?}")]
    CircuitOpen(Duration),
}

/// Observable breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }
}

enum State {
    Closed {
        consecutive_failures: u32,
    },
    Open {
        retry_at: Instant,
    },
    HalfOpen {
        consecutive_successes: u32,
        in_flight: u32,
    },
}

struct Inner {
    state: State,
    last_transition: Instant,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    open_count: u64,
}

/// Breaker statistics snapshot
#[derive(Debug, Clone)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub open_count: u64,
    pub time_in_state: Duration,
}

/// Per-backend circuit breaker
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner {
                state: State::Closed {
                    consecutive_failures: 0,
                },
                last_transition: Instant::now(),
                total_requests: 0,
                total_successes: 0,
                total_failures: 0,
                open_count: 0,
            }),
        }
    }

    /// Admit or reject one request
    ///
    /// The first call at or after the retry deadline moves an `Open` circuit
    /// to `HalfOpen` and is admitted as a trial.
    pub fn check_request(&self) -> Result<(), CircuitError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.total_requests += 1;

        match &mut inner.state {
            State::Closed { .. } => Ok(()),

            State::Open { retry_at } => {
                let retry_at = *retry_at;
                let now = Instant::now();
                if now >= retry_at {
                    info!("circuit transitioning from Open to HalfOpen");
                    inner.state = State::HalfOpen {
                        consecutive_successes: 0,
                        in_flight: 1,
                    };
                    inner.last_transition = now;
                    Ok(())
                } else {
                    Err(CircuitError::CircuitOpen(retry_at - now))
                }
            }

            State::HalfOpen { in_flight, .. } => {
                if *in_flight >= self.settings.half_open_max_requests {
                    // Trial capacity exhausted; treat as still open
                    Err(CircuitError::CircuitOpen(Duration::ZERO))
                } else {
                    *in_flight += 1;
                    Ok(())
                }
            }
        }
    }

    /// Record the outcome of an admitted request
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.total_successes += 1;

        match &mut inner.state {
            State::Closed { consecutive_failures } => {
                *consecutive_failures = 0;
            }

            State::Open { .. } => {
                // A late success from before the circuit opened; ignore
                debug!("success recorded while circuit open");
            }

            State::HalfOpen {
                consecutive_successes,
                in_flight,
            } => {
                *in_flight = in_flight.saturating_sub(1);
                *consecutive_successes += 1;
                let successes = *consecutive_successes;
                if successes >= self.settings.success_threshold {
                    info!(successes = successes, "circuit transitioning from HalfOpen to Closed");
                    inner.state = State::Closed {
                        consecutive_failures: 0,
                    };
                    inner.last_transition = Instant::now();
                }
            }
        }
    }

    /// Record a failed request; may open the circuit
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.total_failures += 1;

        match &mut inner.state {
            State::Closed { consecutive_failures } => {
                *consecutive_failures += 1;
                let failures = *consecutive_failures;
                if failures >= self.settings.failure_threshold {
                    warn!(
                        consecutive_failures = failures,
                        "circuit transitioning from Closed to Open"
                    );
                    inner.state = State::Open {
                        retry_at: Instant::now() + self.settings.open_timeout(),
                    };
                    inner.last_transition = Instant::now();
                    inner.open_count += 1;
                }
            }

            State::Open { .. } => {}

            State::HalfOpen { .. } => {
                warn!("trial request failed, reopening circuit");
                inner.state = State::Open {
                    retry_at: Instant::now() + self.settings.open_timeout(),
                };
                inner.last_transition = Instant::now();
                inner.open_count += 1;
            }
        }
    }

    /// Return an admitted request that never reached the transport
    ///
    /// Used when acquisition times out after admission: the outcome says
    /// nothing about the backend, so neither streak moves, but a half-open
    /// trial slot must be handed back.
    pub fn record_abandoned(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if let State::HalfOpen { in_flight, .. } = &mut inner.state {
            *in_flight = in_flight.saturating_sub(1);
        }
    }

    /// Whether traffic could currently be admitted (no state mutation)
    ///
    /// Used by the load balancer for eligibility and by the maintenance
    /// task to suppress reconnection probes against an open circuit.
    pub fn allows_traffic(&self) -> bool {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        match &inner.state {
            State::Closed { .. } => true,
            State::Open { retry_at } => Instant::now() >= *retry_at,
            State::HalfOpen { in_flight, .. } => {
                *in_flight < self.settings.half_open_max_requests
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            State::Closed { .. } => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Force the circuit closed (administrative override)
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        info!("circuit manually reset to Closed");
        inner.state = State::Closed {
            consecutive_failures: 0,
        };
        inner.last_transition = Instant::now();
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        CircuitStats {
            state: match inner.state {
                State::Closed { .. } => CircuitState::Closed,
                State::Open { .. } => CircuitState::Open,
                State::HalfOpen { .. } => CircuitState::HalfOpen,
            },
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            open_count: inner.open_count,
            time_in_state: inner.last_transition.elapsed(),
        }
    }
}
