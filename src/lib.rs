//! # Pipelined Sieve of Eratosthenes
//!
//! Counts the primes up to a bound with a chain of shared-nothing filter
//! workers that talk only through their mailboxes.
//!
//! ## Key Features
//!
//! - **Zero-sharing by design**: each worker owns its shard of primes and its
//!   link to the next worker; only one pool thread touches a worker at a time
//! - **Dynamic chain**: a worker whose shard is full spawns its successor the
//!   first time it has a prime to pass on
//! - **Structured completion**: a wait-group covers every worker, including
//!   those spawned mid-run
//! - **Bounded threads**: workers are records on a fixed-size pool, so a
//!   chain of thousands of workers runs on one thread per core
//! - **CPU affinity**: optional pinning of pool threads to specific cores
//!
//! ## Architecture
//!
//! ```text
//!                  candidates, then EndOfStream
//! ┌─────────────┐      ┌──────────┐      ┌──────────┐      ┌──────────┐
//! │ Coordinator │ ───> │ Filter 0 │ ───> │ Filter 1 │ ───> │ Filter n │
//! └─────────────┘      │ [shard]  │      │ [shard]  │      │ [shard]  │
//!        ▲             └──────────┘      └──────────┘      └──────────┘
//!        │                  │ owns            │ owns
//!        └── walks the chain head to tail after the barrier, summing shards
//! ```
//!
//! ## Example
//!
//! ```
//! use sieve_pipeline::prelude::*;
//!
//! let sieve = SieveActor::with_shard_capacity(4)?;
//! assert_eq!(sieve.count_primes(100)?, 25);
//! assert_eq!(count_primes(10)?, 4);
//! # Ok::<(), sieve_pipeline::Error>(())
//! ```

#![warn(missing_docs, rust_2018_idioms)]

pub mod channel;
pub mod config;
pub mod error;
pub mod filter;
pub mod message;
pub mod pool;
pub mod shard;
pub mod sieve;
pub mod worker;

// Re-exports
pub use channel::{Channel, ChannelStats};
pub use config::{SieveConfig, DEFAULT_SHARD_CAPACITY};
pub use error::{BoundViolation, Error, Result};
pub use filter::{FilterOutput, FilterWorker};
pub use message::{Envelope, SieveMessage};
pub use pool::{PoolConfig, ThreadConfig, WorkerPool};
pub use shard::PrimeShard;
pub use sieve::{
    count_primes, Candidates, SequentialSieve, Sieve, SieveActor, SieveReport, WorkerReport, MAX_LIMIT,
};
pub use worker::{Flow, Worker, WorkerContext, WorkerHandle, WorkerId, WorkerJoin};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::SieveConfig;
    pub use crate::error::{Error, Result};
    pub use crate::sieve::{count_primes, SequentialSieve, Sieve, SieveActor, SieveReport};
}
