//! Connection lifecycle, pooling and circuit breaking
//!
//! # Components
//!
//! - [`Connection`]: one transport with a lifecycle state machine
//! - [`ConnectionPool`]: bounded per-backend pool with FIFO-fair acquire
//! - [`CircuitBreaker`]: per-backend traffic gate with failure detection

pub mod circuit;
pub mod connection;
#[allow(clippy::module_inception)]
pub mod pool;

pub use circuit::{CircuitBreaker, CircuitError, CircuitState, CircuitStats};
pub use connection::{Connection, ConnectionId, ConnectionState, PASSIVE_ERROR_LIMIT};
pub use pool::{ConnectionPool, PoolError, PoolStats, PooledConnection};
