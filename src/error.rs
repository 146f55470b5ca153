//! Error types for the sieve pipeline

use crate::worker::WorkerId;

/// Result type alias for sieve operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a bound was rejected before any worker was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BoundViolation {
    /// The bound is below zero
    #[error("bound must not be negative")]
    Negative,

    /// The bound is above [`MAX_LIMIT`](crate::sieve::MAX_LIMIT)
    #[error("bound exceeds the largest supported limit")]
    Overflow,

    /// The bound does not fit in the address space of this platform
    #[error("bound exceeds addressable memory")]
    Unaddressable,
}

/// Error types that can occur while counting primes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The requested bound cannot be sieved
    #[error("Invalid bound {limit}: {reason}")]
    InvalidBound {
        /// The rejected bound
        limit: i64,
        /// What is wrong with it
        reason: BoundViolation,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker saw a candidate that the upstream ordering makes impossible
    #[error(
        "Invariant violated at worker {position}: candidate {candidate} after {}",
        describe_last_seen(.last_seen)
    )]
    InvariantViolation {
        /// Chain position of the worker that detected the fault
        position: usize,
        /// The offending candidate
        candidate: u64,
        /// The previous candidate this worker accepted
        last_seen: Option<u64>,
    },

    /// A message reached a worker from someone other than its predecessor
    #[error("Worker {position} received a message from unexpected sender {sender:?}")]
    UnexpectedSender {
        /// Chain position of the receiving worker
        position: WorkerId,
        /// Who the envelope claims sent it; `None` is the coordinator
        sender: Option<WorkerId>,
    },

    /// Channel send error
    #[error("Channel send error: {0}")]
    SendError(String),

    /// Channel receive error
    #[error("Channel receive error: {0}")]
    ReceiveError(String),

    /// The OS refused to start a pool thread
    #[error("Failed to spawn pool thread: {0}")]
    Spawn(String),

    /// Worker panicked
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}

fn describe_last_seen(last_seen: &Option<u64>) -> String {
    match last_seen {
        Some(value) => value.to_string(),
        None => "none".to_string(),
    }
}

impl Error {
    /// Whether this error was raised before any pipeline work began
    pub fn is_rejected_input(&self) -> bool {
        matches!(self, Error::InvalidBound { .. } | Error::InvalidConfig(_))
    }
}

impl<T> From<flume::SendError<T>> for Error {
    fn from(err: flume::SendError<T>) -> Self {
        Error::SendError(err.to_string())
    }
}
