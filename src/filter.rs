//! Filter workers: the links of the sieve chain
//!
//! A filter worker tests each candidate it receives against the primes it
//! holds. Candidates that survive are kept while the shard has room and
//! forwarded to the next worker afterwards. The next worker is spawned the
//! first time there is something to forward to it, by the worker that owns
//! the link and by no one else.
//!
//! Correctness rests on ordering. A candidate reaching worker `k` has already
//! survived workers `0..k`, and every smaller prime reached its shard before
//! the candidate did, so worker `k` only needs its own shard.

use crate::error::{Error, Result};
use crate::message::{Envelope, SieveMessage};
use crate::shard::PrimeShard;
use crate::worker::{Flow, Worker, WorkerContext, WorkerHandle, WorkerId, WorkerJoin};
use tracing::{debug, error, trace};

/// What a filter worker leaves behind once it has stopped
pub struct FilterOutput {
    /// Position in the chain
    pub position: WorkerId,

    /// The primes this worker held
    pub shard: PrimeShard,

    /// Messages taken from this worker's mailbox, end-of-stream included
    pub messages_received: u64,

    /// Candidates passed on to the successor
    pub candidates_forwarded: u64,

    /// The successor, if one was ever spawned
    pub next: Option<WorkerJoin<FilterOutput>>,
}

/// One link of the sieve chain
pub struct FilterWorker {
    position: WorkerId,
    shard: PrimeShard,
    last_seen: Option<u64>,
    candidates_forwarded: u64,
    shard_capacity: usize,
    next: Option<WorkerHandle<SieveMessage, FilterOutput>>,
}

impl FilterWorker {
    /// Create the worker for `position` with an empty shard
    pub fn new(position: WorkerId, shard_capacity: usize) -> Self {
        Self {
            position,
            shard: PrimeShard::with_capacity(shard_capacity),
            last_seen: None,
            candidates_forwarded: 0,
            shard_capacity,
            next: None,
        }
    }

    /// Only the predecessor may write to a worker; the head hears from the
    /// coordinator alone.
    fn check_sender(&self, ctx: &WorkerContext, sender: Option<WorkerId>) -> Result<()> {
        if sender == ctx.id().checked_sub(1) {
            return Ok(());
        }

        error!(worker = self.position, ?sender, "message from unexpected sender");
        Err(Error::UnexpectedSender {
            position: self.position,
            sender,
        })
    }

    fn filter(&mut self, ctx: &WorkerContext, candidate: u64) -> Result<()> {
        self.check_order(candidate)?;

        if self.shard.divides(candidate) {
            return Ok(());
        }

        if let Err(prime) = self.shard.try_push(candidate) {
            self.forward(ctx, SieveMessage::Candidate(prime))?;
            self.candidates_forwarded += 1;
        }
        Ok(())
    }

    /// Candidates arrive odd, above 2, and strictly ascending. Anything else
    /// means the pipeline ordering broke and no count can be trusted.
    fn check_order(&mut self, candidate: u64) -> Result<()> {
        let ascending = match self.last_seen {
            Some(last) => candidate > last,
            None => true,
        };

        if candidate < 3 || candidate % 2 == 0 || !ascending {
            error!(
                worker = self.position,
                candidate,
                last_seen = ?self.last_seen,
                "candidate out of order"
            );
            return Err(Error::InvariantViolation {
                position: self.position,
                candidate,
                last_seen: self.last_seen,
            });
        }

        self.last_seen = Some(candidate);
        Ok(())
    }

    fn forward(&mut self, ctx: &WorkerContext, message: SieveMessage) -> Result<()> {
        if self.next.is_none() {
            let position = self.position + 1;
            let successor = ctx.spawn(Self::new(position, self.shard_capacity), position);
            debug!(
                worker = self.position,
                successor = successor.id(),
                first = ?message.candidate(),
                "chain extended"
            );
            self.next = Some(successor);
        }

        let envelope = Envelope::new(message).with_source(self.position);
        let sent = match &self.next {
            Some(next) => next.send(envelope),
            None => return Ok(()),
        };

        sent.map_err(|err| self.successor_failure(err))
    }

    /// A send only fails once the successor has exited; its own error is
    /// the more useful one to report.
    fn successor_failure(&mut self, err: Error) -> Error {
        match self.next.take().map(WorkerHandle::join) {
            Some(Err(cause)) => cause,
            _ => err,
        }
    }

    fn end_of_stream(&mut self) -> Result<()> {
        let Some(next) = &self.next else {
            trace!(worker = self.position, "end of stream reached tail");
            return Ok(());
        };

        trace!(worker = self.position, successor = next.id(), "forwarding end of stream");
        let sent = next.send(Envelope::new(SieveMessage::EndOfStream).with_source(self.position));
        sent.map_err(|err| self.successor_failure(err))
    }
}

impl Worker for FilterWorker {
    type Message = SieveMessage;
    type Output = FilterOutput;

    fn handle_message(&mut self, ctx: &WorkerContext, message: Envelope<SieveMessage>) -> Result<Flow> {
        self.check_sender(ctx, message.source)?;

        match message.payload {
            SieveMessage::Candidate(candidate) => {
                self.filter(ctx, candidate)?;
                Ok(Flow::Continue)
            }
            SieveMessage::EndOfStream => {
                self.end_of_stream()?;
                Ok(Flow::Stop)
            }
        }
    }

    /// A closed mailbox ends the stream just like an explicit signal. The
    /// successor is closed in turn when this worker drops its mailbox.
    fn disconnected(&mut self, _ctx: &WorkerContext) -> Result<()> {
        debug!(worker = self.position, "mailbox closed without end of stream");
        Ok(())
    }

    fn shutdown(self, ctx: &WorkerContext) -> Result<FilterOutput> {
        debug!(
            worker = self.position,
            primes = self.shard.len(),
            forwarded = self.candidates_forwarded,
            "worker finished"
        );

        let next = self.next.map(|handle| {
            let (mailbox, join) = handle.into_parts();
            drop(mailbox);
            join
        });

        Ok(FilterOutput {
            position: self.position,
            shard: self.shard,
            messages_received: ctx.received(),
            candidates_forwarded: self.candidates_forwarded,
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolConfig, WorkerPool};
    use crossbeam::sync::WaitGroup;

    fn pool() -> WorkerPool {
        WorkerPool::new(PoolConfig::new().with_num_threads(2)).unwrap()
    }

    fn candidate(value: u64) -> Envelope<SieveMessage> {
        Envelope::new(SieveMessage::Candidate(value))
    }

    fn collect(head: WorkerJoin<FilterOutput>) -> Vec<FilterOutput> {
        let mut chain = Vec::new();
        let mut link = Some(head);
        while let Some(join) = link {
            let mut output = join.join().unwrap();
            link = output.next.take();
            chain.push(output);
        }
        chain
    }

    fn run_chain(capacity: usize, candidates: &[u64]) -> Vec<FilterOutput> {
        let pool = pool();
        let barrier = WaitGroup::new();
        let head = pool.spawn(FilterWorker::new(0, capacity), 0, barrier.clone());

        for &c in candidates {
            head.send(candidate(c)).unwrap();
        }
        head.send(Envelope::new(SieveMessage::EndOfStream)).unwrap();

        let (mailbox, join) = head.into_parts();
        drop(mailbox);
        barrier.wait();
        collect(join)
    }

    /// Run a lone head on `messages` and return how it ended
    fn run_head(messages: Vec<Envelope<SieveMessage>>) -> Result<FilterOutput> {
        let pool = pool();
        let barrier = WaitGroup::new();
        let head = pool.spawn(FilterWorker::new(0, DEFAULT_TEST_CAPACITY), 0, barrier.clone());

        for message in messages {
            // A failed head closes its mailbox; later sends are expected to fail.
            let _ = head.send(message);
        }
        let (mailbox, join) = head.into_parts();
        drop(mailbox);
        barrier.wait();
        join.join()
    }

    const DEFAULT_TEST_CAPACITY: usize = 16;

    #[test]
    fn test_single_worker_keeps_primes() {
        let chain = run_chain(10, &[3, 5, 7, 9, 11, 13, 15]);

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].shard.as_slice(), &[3, 5, 7, 11, 13]);
        assert_eq!(chain[0].messages_received, 8);
        assert_eq!(chain[0].candidates_forwarded, 0);
    }

    #[test]
    fn test_overflow_spawns_successors() {
        let odds: Vec<u64> = (3..=31).step_by(2).collect();
        let chain = run_chain(2, &odds);

        let shards: Vec<&[u64]> = chain.iter().map(|w| w.shard.as_slice()).collect();
        assert_eq!(
            shards,
            vec![&[3, 5][..], &[7, 11][..], &[13, 17][..], &[19, 23][..], &[29, 31][..]]
        );
        for (position, worker) in chain.iter().enumerate() {
            assert_eq!(worker.position, position);
        }
        assert!(chain.last().unwrap().next.is_none());
    }

    #[test]
    fn test_composites_are_not_forwarded() {
        // 9, 15, 21, 25, 27 die at the head; 7 onwards move on
        let chain = run_chain(2, &[3, 5, 7, 9, 11, 15, 21, 25, 27]);

        assert_eq!(chain[0].candidates_forwarded, 2);
        assert_eq!(chain[1].shard.as_slice(), &[7, 11]);
        // forwarded candidates plus end of stream
        assert_eq!(chain[1].messages_received, 3);
    }

    #[test]
    fn test_out_of_order_candidate_is_fatal() {
        let result = run_head(vec![
            candidate(7),
            candidate(5),
            Envelope::new(SieveMessage::EndOfStream),
        ]);

        assert_eq!(
            result.err(),
            Some(Error::InvariantViolation {
                position: 0,
                candidate: 5,
                last_seen: Some(7),
            })
        );
    }

    #[test]
    fn test_even_candidate_is_fatal() {
        assert!(matches!(
            run_head(vec![candidate(4)]),
            Err(Error::InvariantViolation { candidate: 4, .. })
        ));
    }

    #[test]
    fn test_head_only_accepts_the_coordinator() {
        let result = run_head(vec![candidate(3), candidate(5).with_source(2)]);

        assert_eq!(
            result.err(),
            Some(Error::UnexpectedSender {
                position: 0,
                sender: Some(2),
            })
        );
    }

    #[test]
    fn test_successor_only_accepts_its_predecessor() {
        let pool = pool();
        let barrier = WaitGroup::new();
        let worker = pool.spawn(FilterWorker::new(3, 4), 3, barrier.clone());

        worker.send(candidate(11).with_source(2)).unwrap();
        let _ = worker.send(candidate(13));
        let (mailbox, join) = worker.into_parts();
        drop(mailbox);
        barrier.wait();

        assert_eq!(
            join.join().err(),
            Some(Error::UnexpectedSender {
                position: 3,
                sender: None,
            })
        );
    }

    #[test]
    fn test_fault_downstream_reaches_head() {
        let pool = pool();

        // Hand-build a successor that has already failed on a smaller candidate.
        let successor_done = WaitGroup::new();
        let successor = pool.spawn(FilterWorker::new(1, 1), 1, successor_done.clone());
        successor.send(candidate(101).with_source(0)).unwrap();
        successor.send(candidate(99).with_source(0)).unwrap();
        successor_done.wait();

        let mut head = FilterWorker::new(0, 1);
        head.next = Some(successor);
        head.shard.try_push(3).unwrap();

        let barrier = WaitGroup::new();
        let handle = pool.spawn(head, 0, barrier.clone());
        // 5 survives the head's shard and is forwarded to the dead successor.
        let _ = handle.send(candidate(5));
        let (mailbox, join) = handle.into_parts();
        drop(mailbox);
        barrier.wait();

        match join.join() {
            Err(Error::InvariantViolation { position: 1, .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected the downstream fault"),
        }
    }

    #[test]
    fn test_disconnect_closes_the_chain() {
        let odds: Vec<u64> = (3..=51).step_by(2).collect();
        let pool = pool();
        let barrier = WaitGroup::new();
        let head = pool.spawn(FilterWorker::new(0, 3), 0, barrier.clone());

        for c in odds {
            head.send(candidate(c)).unwrap();
        }
        // No end of stream: dropping the mailbox must still let every worker finish.
        let (mailbox, join) = head.into_parts();
        drop(mailbox);
        barrier.wait();

        let chain = collect(join);
        let held: usize = chain.iter().map(|w| w.shard.len()).sum();
        // odd primes up to 51
        assert_eq!(held, 14);
    }
}
