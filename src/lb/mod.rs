//! Load balancing and backend health
//!
//! # Components
//!
//! - [`Backend`]: per-endpoint live metrics (atomic counters)
//! - [`LoadBalancer`]: strategy-driven backend selection
//! - [`HealthChecker`]: periodic active sweeps over idle connections
//!
//! # Strategies
//!
//! - **Round-robin**: cycles backends in configuration order
//! - **Least-connections**: fewest in-flight requests, ties by cursor order
//! - **Weighted round-robin**: random draw proportional to static weights
//! - **Least-response-time**: lowest rolling average latency
//! - **Power-of-two-choices**: two random samples, fewer in-flight wins
//! - **Session affinity**: deterministic hash of a caller key
//!
//! All strategies exclude backends whose circuit breaker rejects traffic;
//! when every backend is excluded, selection fails rather than routing into
//! a known-bad endpoint.

pub mod backend;
pub mod balancer;
pub mod health;

pub use backend::{Backend, BackendStats};
pub use balancer::{LoadBalancer, SelectError};
pub use health::HealthChecker;
