//! Message types for the filter chain

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

use crate::worker::WorkerId;

/// A message travelling down the filter chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum SieveMessage {
    /// An odd number to test against the receiving worker's shard
    Candidate(u64),

    /// No further candidates will follow. Sent once by the coordinator and
    /// forwarded once by every worker that has a successor.
    EndOfStream,
}

impl SieveMessage {
    /// The candidate value, if this is a candidate
    pub fn candidate(&self) -> Option<u64> {
        match self {
            SieveMessage::Candidate(value) => Some(*value),
            SieveMessage::EndOfStream => None,
        }
    }
}

/// A payload tagged with the worker that sent it
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct Envelope<T> {
    /// The actual message payload
    pub payload: T,

    /// Chain position of the sending worker; `None` for the coordinator.
    /// Workers refuse envelopes that did not come from their predecessor.
    pub source: Option<WorkerId>,
}

impl<T> Envelope<T> {
    /// Create a new envelope sent by the coordinator
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            source: None,
        }
    }

    /// Set the source worker
    pub fn with_source(mut self, source: WorkerId) -> Self {
        self.source = Some(source);
        self
    }
}
