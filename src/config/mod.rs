use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Load balancing strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Cycle backends in configuration order
    #[default]
    RoundRobin,
    /// Pick the backend with the fewest in-use connections
    LeastConnections,
    /// Weighted random draw proportional to configured weights
    WeightedRoundRobin,
    /// Pick the backend with the lowest rolling average latency
    LeastResponseTime,
    /// Sample two backends, keep the one with fewer in-use connections
    PowerOfTwo,
    /// Deterministic hash of a caller-supplied key
    SessionAffinity,
}

/// One configured backend endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend address, opaque to the core (handed to the Connector)
    pub address: String,

    /// Static weight for weighted strategies
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Per-backend pool sizing and eviction tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Minimum connections kept warm per backend
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,

    /// Maximum connections per backend
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Max wait for acquire, in milliseconds
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Transport connect timeout, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle time before a connection is evicted, in milliseconds
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Maximum connection age before eviction, in milliseconds
    #[serde(default = "default_max_age_ms")]
    pub max_connection_age_ms: u64,

    /// Interval between active health check sweeps, in milliseconds
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
}

fn default_min_connections() -> usize {
    2
}

fn default_max_connections() -> usize {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_idle_timeout_ms() -> u64 {
    90_000
}

fn default_max_age_ms() -> u64 {
    600_000
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_connection_age_ms: default_max_age_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
        }
    }
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn max_connection_age(&self) -> Duration {
        Duration::from_millis(self.max_connection_age_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

/// Circuit breaker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive trial successes before the circuit closes
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// How long the circuit stays open before probing, in milliseconds
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,

    /// Maximum trial requests admitted while half-open
    #[serde(default = "default_half_open_max_requests")]
    pub half_open_max_requests: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    3
}

fn default_open_timeout_ms() -> u64 {
    30_000
}

fn default_half_open_max_requests() -> u32 {
    3
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            open_timeout_ms: default_open_timeout_ms(),
            half_open_max_requests: default_half_open_max_requests(),
        }
    }
}

impl BreakerSettings {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

/// Reconnection backoff tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSettings {
    /// First retry delay, in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_ms: u64,

    /// Delay cap, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_ms: u64,

    /// Growth factor applied per attempt
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,

    /// Add up to this fraction of the delay as random jitter (0.0 disables)
    #[serde(default)]
    pub jitter: f64,
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_backoff_ms(),
            max_ms: default_max_backoff_ms(),
            multiplier: default_backoff_multiplier(),
            jitter: 0.0,
        }
    }
}

impl BackoffSettings {
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

/// Heartbeat (application-level liveness probe) tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    /// Interval between heartbeat sweeps, in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,

    /// Max wait for a probe reply, in milliseconds
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,

    /// Probe payload sent to the backend; when absent only the transport
    /// liveness predicate is consulted
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub probe: Option<Vec<u8>>,
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    3_000
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
            timeout_ms: default_heartbeat_timeout_ms(),
            probe: None,
        }
    }
}

impl HeartbeatSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Pending-request queue tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum buffered items
    #[serde(default = "default_max_queue_size")]
    pub max_size: usize,

    /// Retries per item before it is reported permanently failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_queue_size() -> usize {
    1_024
}

fn default_max_retries() -> u32 {
    3
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: default_max_queue_size(),
            max_retries: default_max_retries(),
        }
    }
}

/// Top-level client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend endpoints to balance across
    pub backends: Vec<BackendConfig>,

    /// Load balancing strategy
    #[serde(default)]
    pub strategy: Strategy,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub backoff: BackoffSettings,

    #[serde(default)]
    pub heartbeat: HeartbeatSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    /// Max wait for a reply on execute, in milliseconds
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Session bindings idle out after this long, in milliseconds
    #[serde(default = "default_session_idle_timeout_ms")]
    pub session_idle_timeout_ms: u64,
}

fn default_receive_timeout_ms() -> u64 {
    30_000
}

fn default_session_idle_timeout_ms() -> u64 {
    300_000
}

impl ClientConfig {
    /// Configuration for a set of backend addresses with default tuning
    pub fn for_backends<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            backends: addresses
                .into_iter()
                .map(|a| BackendConfig { address: a.into(), weight: 1 })
                .collect(),
            strategy: Strategy::default(),
            pool: PoolSettings::default(),
            breaker: BreakerSettings::default(),
            backoff: BackoffSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            queue: QueueSettings::default(),
            receive_timeout_ms: default_receive_timeout_ms(),
            session_idle_timeout_ms: default_session_idle_timeout_ms(),
        }
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.session_idle_timeout_ms)
    }

    /// Validate bounds; invalid configuration is fatal at construction
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            anyhow::bail!("at least one backend must be configured");
        }
        if self.pool.max_connections == 0 {
            anyhow::bail!("max_connections must be at least 1");
        }
        if self.pool.min_connections > self.pool.max_connections {
            anyhow::bail!(
                "min_connections ({}) exceeds max_connections ({})",
                self.pool.min_connections,
                self.pool.max_connections
            );
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            anyhow::bail!("breaker thresholds must be at least 1");
        }
        if self.backoff.multiplier < 1.0 {
            anyhow::bail!("backoff multiplier must be >= 1.0");
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            anyhow::bail!("backoff jitter must be within [0.0, 1.0]");
        }
        if self.backoff.initial_ms > self.backoff.max_ms {
            anyhow::bail!("initial backoff exceeds max backoff");
        }
        if self.queue.max_size == 0 {
            anyhow::bail!("queue max_size must be at least 1");
        }
        for backend in &self.backends {
            if backend.address.is_empty() {
                anyhow::bail!("backend address must not be empty");
            }
            if backend.weight == 0 {
                anyhow::bail!("backend weight must be at least 1: {}", backend.address);
            }
        }
        Ok(())
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<ClientConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: ClientConfig =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    config.validate()?;
    Ok(config)
}

/// Load configuration from environment variables
///
/// Recognized variables:
/// - WIREPOOL_BACKENDS (comma-separated address list, required)
/// - WIREPOOL_STRATEGY (round_robin, least_connections, weighted_round_robin,
///   least_response_time, power_of_two, session_affinity)
/// - WIREPOOL_MIN_CONNECTIONS / WIREPOOL_MAX_CONNECTIONS
/// - WIREPOOL_ACQUIRE_TIMEOUT_MS
/// - WIREPOOL_MAX_RETRIES
pub fn load_from_env() -> Result<ClientConfig> {
    // Pick up a .env file when present, ignore when absent
    let _ = dotenvy::dotenv();

    let addresses = std::env::var("WIREPOOL_BACKENDS")
        .context("WIREPOOL_BACKENDS environment variable not set")?;

    let backends: Vec<BackendConfig> = addresses
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| BackendConfig { address: s.to_string(), weight: 1 })
        .collect();

    if backends.is_empty() {
        anyhow::bail!("WIREPOOL_BACKENDS contains no valid addresses");
    }

    let mut config = ClientConfig::for_backends(Vec::<String>::new());
    config.backends = backends;

    if let Ok(strategy) = std::env::var("WIREPOOL_STRATEGY") {
        config.strategy = serde_yaml::from_str(&strategy)
            .context(format!("Unknown load balancing strategy: {strategy}"))?;
    }

    if let Ok(min) = std::env::var("WIREPOOL_MIN_CONNECTIONS") {
        if let Ok(val) = min.parse() {
            config.pool.min_connections = val;
        }
    }

    if let Ok(max) = std::env::var("WIREPOOL_MAX_CONNECTIONS") {
        if let Ok(val) = max.parse() {
            config.pool.max_connections = val;
        }
    }

    if let Ok(timeout) = std::env::var("WIREPOOL_ACQUIRE_TIMEOUT_MS") {
        if let Ok(val) = timeout.parse() {
            config.pool.acquire_timeout_ms = val;
        }
    }

    if let Ok(retries) = std::env::var("WIREPOOL_MAX_RETRIES") {
        if let Ok(val) = retries.parse() {
            config.queue.max_retries = val;
        }
    }

    config.validate()?;
    Ok(config)
}
