//! Pipeline configuration

use crate::error::{Error, Result};
use crate::pool::PoolConfig;

/// Primes held by one worker before the chain grows
pub const DEFAULT_SHARD_CAPACITY: usize = 1000;

/// Configuration of a sieve pipeline
///
/// The shard capacity decides how many workers a run needs, never the count
/// it returns. The pool settings decide how many threads those workers share.
#[derive(Debug, Clone)]
pub struct SieveConfig {
    /// Primes each worker holds before forwarding to a successor
    pub shard_capacity: usize,

    /// Threads that run the workers
    pub pool: PoolConfig,
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            shard_capacity: DEFAULT_SHARD_CAPACITY,
            pool: PoolConfig::default(),
        }
    }
}

impl SieveConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shard capacity
    pub fn with_shard_capacity(mut self, capacity: usize) -> Self {
        self.shard_capacity = capacity;
        self
    }

    /// Set the number of pool threads
    pub fn with_threads(mut self, num: usize) -> Self {
        self.pool = self.pool.with_num_threads(num);
        self
    }

    /// Set the pool thread name prefix
    pub fn with_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.pool = self.pool.with_thread_prefix(prefix);
        self
    }

    /// Enable CPU affinity pinning of pool threads
    pub fn with_pinned_threads(mut self, pin: bool) -> Self {
        self.pool = self.pool.with_cpu_affinity(pin);
        self
    }

    /// Set the pool thread stack size
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.pool = self.pool.with_stack_size(size);
        self
    }

    /// Set how many messages a worker handles per turn
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.pool = self.pool.with_batch_size(size);
        self
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.shard_capacity == 0 {
            return Err(Error::InvalidConfig(
                "shard capacity must be at least 1".to_string(),
            ));
        }
        self.pool.validate()
    }
}
