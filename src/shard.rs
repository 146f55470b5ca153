//! Bounded per-worker store of discovered primes

/// The primes one worker has discovered, in discovery order
///
/// Discovery order is ascending because candidates flow through the chain in
/// ascending order. The shard never grows past its capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimeShard {
    primes: Vec<u64>,
    capacity: usize,
}

impl PrimeShard {
    /// Create an empty shard holding at most `capacity` primes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            primes: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Whether any prime held here divides `candidate`
    pub fn divides(&self, candidate: u64) -> bool {
        for &prime in &self.primes {
            // A composite candidate has a factor no larger than its square root.
            if prime.saturating_mul(prime) > candidate {
                return false;
            }
            if candidate % prime == 0 {
                return true;
            }
        }
        false
    }

    /// Store `prime`, or hand it back if the shard is full
    pub fn try_push(&mut self, prime: u64) -> Result<(), u64> {
        if self.is_full() {
            return Err(prime);
        }
        debug_assert!(self.primes.last().map_or(true, |&last| last < prime));
        self.primes.push(prime);
        Ok(())
    }

    /// Number of primes held
    pub fn len(&self) -> usize {
        self.primes.len()
    }

    /// Whether no prime is held yet
    pub fn is_empty(&self) -> bool {
        self.primes.is_empty()
    }

    /// Whether the shard is at capacity
    pub fn is_full(&self) -> bool {
        self.primes.len() >= self.capacity
    }

    /// Maximum number of primes this shard holds
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest prime held
    pub fn last(&self) -> Option<u64> {
        self.primes.last().copied()
    }

    /// Primes in ascending order
    pub fn as_slice(&self) -> &[u64] {
        &self.primes
    }

    /// Take the primes out of the shard
    pub fn into_vec(self) -> Vec<u64> {
        self.primes
    }
}
