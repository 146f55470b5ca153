//! The coordinator and the public counting entry points
//!
//! [`SieveActor`] feeds odd candidates into a fresh filter chain running on a
//! fresh worker pool, waits for every worker the run spawned, then walks the
//! chain from head to tail to add up what each worker holds. [`SequentialSieve`] is the textbook
//! single-threaded sieve, kept as a reference for the pipelined one.

use crate::config::SieveConfig;
use crate::error::{BoundViolation, Error, Result};
use crate::filter::{FilterOutput, FilterWorker};
use crate::message::{Envelope, SieveMessage};
use crate::pool::WorkerPool;
use crate::worker::{WorkerHandle, WorkerId, WorkerJoin};
use crossbeam::sync::WaitGroup;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[cfg(feature = "serialization")]
use serde::Serialize;

/// Largest bound accepted
///
/// Candidates are `u64`, so stepping past any `i64` bound cannot overflow
/// them. The cap is deliberately tighter than that: it keeps the candidate
/// after the last one representable as an `i64` too, so every accepted bound
/// round-trips through the signed input type.
pub const MAX_LIMIT: i64 = i64::MAX - 2;

/// Anything that can count the primes up to a bound
pub trait Sieve {
    /// Count the primes less than or equal to `limit`
    fn count_primes(&self, limit: i64) -> Result<u64>;
}

/// Count the primes up to `limit` with a default-configured pipeline
pub fn count_primes(limit: i64) -> Result<u64> {
    SieveActor::default().count_primes(limit)
}

/// Check a caller-supplied bound before any work starts
pub fn validate_limit(limit: i64) -> Result<u64> {
    if limit < 0 {
        return Err(Error::InvalidBound {
            limit,
            reason: BoundViolation::Negative,
        });
    }
    if limit > MAX_LIMIT {
        return Err(Error::InvalidBound {
            limit,
            reason: BoundViolation::Overflow,
        });
    }
    Ok(limit as u64)
}

/// The odd numbers in `[3, limit]`, ascending
#[derive(Debug, Clone)]
pub struct Candidates {
    next: Option<u64>,
    limit: u64,
}

impl Candidates {
    /// Candidates up to and including `limit`
    pub fn up_to(limit: u64) -> Self {
        Self {
            next: Some(3),
            limit,
        }
    }
}

impl Iterator for Candidates {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let current = self.next.filter(|&c| c <= self.limit)?;
        self.next = current.checked_add(2);
        Some(current)
    }
}

/// Per-worker summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(Serialize))]
pub struct WorkerReport {
    /// Position in the chain
    pub position: WorkerId,

    /// Primes held in the worker's shard
    pub primes_held: usize,

    /// Largest prime the worker held
    pub largest_prime: Option<u64>,

    /// Messages the worker took from its mailbox, end-of-stream included
    pub messages_received: u64,

    /// Candidates the worker passed to its successor
    pub candidates_forwarded: u64,
}

impl From<&FilterOutput> for WorkerReport {
    fn from(output: &FilterOutput) -> Self {
        Self {
            position: output.position,
            primes_held: output.shard.len(),
            largest_prime: output.shard.last(),
            messages_received: output.messages_received,
            candidates_forwarded: output.candidates_forwarded,
        }
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(Serialize))]
pub struct SieveReport {
    /// The bound the run was asked for
    pub limit: u64,

    /// Primes less than or equal to `limit`
    pub count: u64,

    /// Candidates the coordinator sent to the head
    pub candidates_sent: u64,

    /// Shard capacity the run used
    pub shard_capacity: usize,

    /// Pool threads the workers shared
    pub pool_threads: usize,

    /// One entry per worker, head first
    pub workers: Vec<WorkerReport>,
}

impl SieveReport {
    /// Number of workers the run created
    pub fn workers_created(&self) -> usize {
        self.workers.len()
    }

    /// Primes held across all shards; 2 is never among them
    pub fn primes_in_shards(&self) -> u64 {
        self.workers.iter().map(|w| w.primes_held as u64).sum()
    }
}

/// The pipelined sieve
#[derive(Debug, Clone, Default)]
pub struct SieveActor {
    config: Arc<SieveConfig>,
}

impl SieveActor {
    /// Create a sieve with the given configuration
    pub fn new(config: SieveConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Create a sieve whose workers hold `capacity` primes each
    pub fn with_shard_capacity(capacity: usize) -> Result<Self> {
        Self::new(SieveConfig::new().with_shard_capacity(capacity))
    }

    /// The configuration in use
    pub fn config(&self) -> &SieveConfig {
        &self.config
    }

    /// Count the primes up to `limit` and describe the chain that did it
    pub fn run(&self, limit: i64) -> Result<SieveReport> {
        let bound = validate_limit(limit)?;
        let started = Instant::now();
        info!(limit = bound, shard_capacity = self.config.shard_capacity, "sieve run starting");

        let (chain, candidates_sent, pool_threads) = self.drive(bound)?;

        let workers: Vec<WorkerReport> = chain.iter().map(WorkerReport::from).collect();
        let held: u64 = workers.iter().map(|w| w.primes_held as u64).sum();
        // 2 is never sent, so it is counted here.
        let count = if bound >= 2 { held + 1 } else { 0 };

        info!(
            limit = bound,
            count,
            workers = workers.len(),
            pool_threads,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sieve run complete"
        );

        Ok(SieveReport {
            limit: bound,
            count,
            candidates_sent,
            shard_capacity: self.config.shard_capacity,
            pool_threads,
            workers,
        })
    }

    /// The primes up to `limit`, ascending, gathered from every shard
    pub fn collect_primes(&self, limit: i64) -> Result<Vec<u64>> {
        let bound = validate_limit(limit)?;
        let (chain, _, _) = self.drive(bound)?;

        let mut primes = Vec::new();
        if bound >= 2 {
            primes.push(2);
        }
        for output in chain {
            primes.extend(output.shard.into_vec());
        }
        Ok(primes)
    }

    /// Feed a fresh chain, wait for it to drain, and collect it head first
    ///
    /// Returns the chain, the candidates sent and the pool size.
    fn drive(&self, bound: u64) -> Result<(Vec<FilterOutput>, u64, usize)> {
        let pool = WorkerPool::new(self.config.pool.clone())?;
        let barrier = WaitGroup::new();
        let head = pool.spawn(FilterWorker::new(0, self.config.shard_capacity), 0, barrier.clone());

        let fed = feed(&head, bound);

        let (mailbox, head) = head.into_parts();
        drop(mailbox);
        barrier.wait();
        debug!("all workers finished");

        let chain = walk(head)?;
        let sent = fed?;
        Ok((chain, sent, pool.num_threads()))
    }
}

impl Sieve for SieveActor {
    fn count_primes(&self, limit: i64) -> Result<u64> {
        self.run(limit).map(|report| report.count)
    }
}

/// Send every candidate and then the end-of-stream signal to the head
fn feed(head: &WorkerHandle<SieveMessage, FilterOutput>, bound: u64) -> Result<u64> {
    let mut sent = 0;
    for candidate in Candidates::up_to(bound) {
        head.send(Envelope::new(SieveMessage::Candidate(candidate)))?;
        sent += 1;
    }
    head.send(Envelope::new(SieveMessage::EndOfStream))?;
    Ok(sent)
}

/// Join the chain from the head, following each worker's link to the next
fn walk(head: WorkerJoin<FilterOutput>) -> Result<Vec<FilterOutput>> {
    let mut chain = Vec::new();
    let mut link = Some(head);

    while let Some(join) = link {
        let mut output = join.join()?;
        link = output.next.take();
        chain.push(output);
    }

    Ok(chain)
}

/// Single-threaded sieve of Eratosthenes
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialSieve;

impl SequentialSieve {
    /// Create a sequential sieve
    pub fn new() -> Self {
        Self
    }
}

impl Sieve for SequentialSieve {
    fn count_primes(&self, limit: i64) -> Result<u64> {
        let bound = validate_limit(limit)?;
        let n = usize::try_from(bound).map_err(|_| Error::InvalidBound {
            limit,
            reason: BoundViolation::Unaddressable,
        })?;
        if n < 2 {
            return Ok(0);
        }

        let mut composite = vec![false; n + 1];
        let mut count = 0;
        for i in 2..=n {
            if composite[i] {
                continue;
            }
            count += 1;
            let mut multiple = match i.checked_mul(i) {
                Some(square) => square,
                None => continue,
            };
            while multiple <= n {
                composite[multiple] = true;
                multiple += i;
            }
        }
        Ok(count)
    }
}
