//! Configuration for kvserver
//!
//! Centralized configuration with sensible defaults.
//!
//! The server binary is bootstrapped with three positional integers,
//! `<max-clients> <shards> <queue-depth>`, defaulting to `10 40 1`.

use std::time::Duration;

use crate::error::{KvError, Result};

/// Bootstrap triple used when the server is started without parameters
pub const DEFAULT_BOOTSTRAP: [usize; 3] = [10, 40, 1];

/// Default TCP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:12345";

/// Main configuration for a kvserver instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Worker pool size: sessions served at the same time
    pub max_clients: usize,

    /// Sessions allowed to wait for a free worker before new
    /// connections are rejected with `PoolSaturated`
    pub queue_depth: usize,

    /// Idle session timeout (milliseconds, 0 disables)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 disables)
    pub write_timeout_ms: u64,

    /// How long shutdown waits for sessions to drain (milliseconds)
    pub shutdown_grace_ms: u64,

    // -------------------------------------------------------------------------
    // Store Configuration
    // -------------------------------------------------------------------------
    /// Number of independently locked keyspace partitions
    pub shards: usize,

    /// Upper bound on a single GETWHEN wait (milliseconds)
    pub get_when_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Metrics Configuration
    // -------------------------------------------------------------------------
    /// Metric samples buffered before the oldest are dropped
    pub metrics_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let [max_clients, shards, queue_depth] = DEFAULT_BOOTSTRAP;
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            max_clients,
            queue_depth,
            read_timeout_ms: 300_000, // 5 minutes idle
            write_timeout_ms: 5000,
            shutdown_grace_ms: 5000,
            shards,
            get_when_timeout_ms: 30_000,
            metrics_capacity: 64 * 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Build a config from the positional bootstrap parameters
    ///
    /// An empty slice selects [`DEFAULT_BOOTSTRAP`]; otherwise exactly three
    /// values are required: max clients, shards, queue depth.
    pub fn from_bootstrap(params: &[usize]) -> Result<Self> {
        let [max_clients, shards, queue_depth] = match params {
            [] => DEFAULT_BOOTSTRAP,
            [a, b, c] => [*a, *b, *c],
            other => {
                return Err(KvError::Config(format!(
                    "expected 3 bootstrap parameters <max-clients> <shards> <queue-depth>, got {}",
                    other.len()
                )))
            }
        };

        let config = Config::builder()
            .max_clients(max_clients)
            .shards(shards)
            .queue_depth(queue_depth)
            .build();
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_clients == 0 {
            return Err(KvError::Config("max_clients must be at least 1".into()));
        }
        if self.shards == 0 {
            return Err(KvError::Config("shards must be at least 1".into()));
        }
        if self.metrics_capacity == 0 {
            return Err(KvError::Config("metrics_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn get_when_timeout(&self) -> Duration {
        Duration::from_millis(self.get_when_timeout_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the worker pool size
    pub fn max_clients(mut self, count: usize) -> Self {
        self.config.max_clients = count;
        self
    }

    /// Set the pending-session queue depth
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.config.queue_depth = depth;
        self
    }

    /// Set the number of store shards
    pub fn shards(mut self, count: usize) -> Self {
        self.config.shards = count;
        self
    }

    /// Set the idle read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the shutdown grace period (in milliseconds)
    pub fn shutdown_grace_ms(mut self, ms: u64) -> Self {
        self.config.shutdown_grace_ms = ms;
        self
    }

    /// Set the GETWHEN wait bound (in milliseconds)
    pub fn get_when_timeout_ms(mut self, ms: u64) -> Self {
        self.config.get_when_timeout_ms = ms;
        self
    }

    /// Set the metric ring buffer capacity
    pub fn metrics_capacity(mut self, capacity: usize) -> Self {
        self.config.metrics_capacity = capacity;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
