//! wirepool - resilient connection management for message-oriented backends
//!
//! A client-side core that keeps traffic flowing across a set of backend
//! endpoints while individual connections and whole backends fail and
//! recover. The transport is pluggable ([`transport::Connector`] /
//! [`transport::Transport`]); everything above it is provided here:
//!
//! - [`pool::ConnectionPool`]: bounded per-backend pool with FIFO-fair
//!   acquisition and lazy health screening
//! - [`pool::CircuitBreaker`]: per-backend Closed / Open / HalfOpen gating
//! - [`lb::LoadBalancer`]: six selection strategies over live backend
//!   metrics
//! - [`lb::HealthChecker`]: periodic active sweeps over idle connections
//! - [`queue::RequestQueue`]: priority buffer for work that could not run
//! - [`client::ResilientClient`]: the façade wiring it all together, with
//!   reconnection backoff, heartbeats, and session affinity
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use wirepool::{ClientConfig, Outcome, ResilientClient};
//! # use wirepool::transport::Connector;
//! # fn connector() -> Arc<dyn Connector> { unimplemented!() }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ClientConfig::for_backends(["10.0.0.1:9000", "10.0.0.2:9000"]);
//! let client = ResilientClient::new(config, connector())?;
//! client.start().await;
//!
//! match client.execute(Bytes::from_static(b"ping")).await? {
//!     Outcome::Completed(reply) => println!("{} reply bytes", reply.len()),
//!     Outcome::Queued => println!("buffered for retry"),
//! }
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod lb;
pub mod pool;
pub mod queue;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use client::{ClientError, ClientStats, Outcome, ResilientClient};
pub use config::{ClientConfig, Strategy};
pub use pool::{CircuitState, PoolError};
pub use transport::{Connector, Transport, TransportError};
