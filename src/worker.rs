//! Worker abstraction for the filter chain
//!
//! Workers are isolated execution units with their own state and mailbox.
//! They communicate only through message passing, never sharing memory.
//! A worker does not own a thread. It is parked in a record next to its
//! mailbox, and sending to the mailbox queues the record on the pool that
//! spawned it. A pool thread then handles up to a batch of messages and
//! moves on, so thousands of workers can share a handful of threads.
//!
//! Every live worker holds a token of a [`WaitGroup`]. The token is released
//! once the worker has finished, whichever way it finishes, so a coordinator
//! waiting on the group observes the completion of every worker ever spawned
//! from it, including the ones spawned by other workers.

use crate::channel::{Channel, ChannelStats, Receiver, Sender};
use crate::error::{Error, Result};
use crate::message::Envelope;
use crate::pool::Task;
use crossbeam::sync::WaitGroup;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Position of a worker in its chain; the head is 0
pub type WorkerId = usize;

/// What a worker wants after handling a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep receiving
    Continue,

    /// Stop receiving and shut down
    Stop,
}

/// Context handed to a worker while it runs
pub struct WorkerContext {
    id: WorkerId,
    barrier: WaitGroup,
    stats: Arc<ChannelStats>,
    spawner: Spawner,
}

impl WorkerContext {
    /// Position of the running worker
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Messages this worker has taken from its mailbox so far
    pub fn received(&self) -> u64 {
        self.stats.received()
    }

    /// Start another worker on the same pool, covered by the same barrier
    pub fn spawn<V>(&self, worker: V, id: WorkerId) -> WorkerHandle<V::Message, V::Output>
    where
        V: Worker,
    {
        self.spawner.spawn(worker, id, self.barrier.clone())
    }
}

/// Trait for worker message handlers
pub trait Worker: Send + Sized + 'static {
    /// The type of messages this worker processes
    type Message: Send + 'static;

    /// What the worker hands back once it has finished
    type Output: Send + 'static;

    /// Handle an incoming message
    fn handle_message(
        &mut self,
        ctx: &WorkerContext,
        message: Envelope<Self::Message>,
    ) -> Result<Flow>;

    /// Called when every sender is gone before the worker asked to stop
    fn disconnected(&mut self, _ctx: &WorkerContext) -> Result<()> {
        Ok(())
    }

    /// Consume the worker once it has stopped receiving
    fn shutdown(self, ctx: &WorkerContext) -> Result<Self::Output>;
}

/// Something a pool thread can give a turn to
pub(crate) trait Runnable: Send + Sync {
    /// Handle whatever is waiting, then give the thread back
    fn run(self: Arc<Self>);

    /// Make sure a turn is queued if one is not already
    fn wake(self: Arc<Self>);
}

/// Starts workers on a pool
#[derive(Clone)]
pub struct Spawner {
    queue: flume::Sender<Task>,
    batch_size: usize,
}

impl Spawner {
    pub(crate) fn new(queue: flume::Sender<Task>, batch_size: usize) -> Self {
        Self { queue, batch_size }
    }

    /// Start a worker
    ///
    /// The worker keeps `barrier` until it has finished. Nothing runs until
    /// the first message or the closing of the mailbox.
    pub fn spawn<W>(&self, worker: W, id: WorkerId, barrier: WaitGroup) -> WorkerHandle<W::Message, W::Output>
    where
        W: Worker,
    {
        let (sender, inbox) = Channel::mailbox();
        let (output, results) = flume::bounded(1);

        let ctx = WorkerContext {
            id,
            barrier,
            stats: inbox.stats(),
            spawner: self.clone(),
        };
        let actor = Arc::new(Actor {
            id,
            scheduled: AtomicBool::new(false),
            batch_size: self.batch_size,
            queue: self.queue.clone(),
            state: Mutex::new(Some(Running {
                worker,
                inbox,
                ctx,
                output,
            })),
        });

        trace!(worker = id, "worker spawned");

        WorkerHandle {
            mailbox: Mailbox {
                sender: Some(sender),
                actor,
            },
            join: WorkerJoin { id, results },
        }
    }
}

/// Sending side of a worker's mailbox
///
/// Dropping the last one closes the mailbox, which the worker treats as the
/// end of its input.
pub struct Mailbox<M> {
    sender: Option<Sender<Envelope<M>>>,
    actor: Arc<dyn Runnable>,
}

impl<M> Mailbox<M> {
    /// Queue a message and make sure the worker gets a turn to handle it
    pub fn send(&self, envelope: Envelope<M>) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::SendError("mailbox closed".to_string()))?;
        sender.send(envelope)?;
        Arc::clone(&self.actor).wake();
        Ok(())
    }
}

impl<M> Drop for Mailbox<M> {
    fn drop(&mut self) {
        drop(self.sender.take());
        // The worker has to run once more to notice the disconnect.
        Arc::clone(&self.actor).wake();
    }
}

/// Handle for a live worker: its mailbox plus the right to its output
pub struct WorkerHandle<M, O> {
    mailbox: Mailbox<M>,
    join: WorkerJoin<O>,
}

impl<M, O> WorkerHandle<M, O> {
    /// Get the worker ID
    pub fn id(&self) -> WorkerId {
        self.join.id
    }

    /// Send a message envelope to the worker
    pub fn send(&self, envelope: Envelope<M>) -> Result<()> {
        self.mailbox.send(envelope)
    }

    /// Split into the mailbox and the join handle
    pub fn into_parts(self) -> (Mailbox<M>, WorkerJoin<O>) {
        (self.mailbox, self.join)
    }

    /// Close the mailbox and wait for the worker to finish
    pub fn join(self) -> Result<O> {
        let (mailbox, join) = self.into_parts();
        drop(mailbox);
        join.join()
    }
}

/// Owned right to collect a worker's output
pub struct WorkerJoin<O> {
    id: WorkerId,
    results: flume::Receiver<Result<O>>,
}

impl<O> WorkerJoin<O> {
    /// Get the worker ID
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Wait for the worker to finish and return its output
    pub fn join(self) -> Result<O> {
        self.results.recv().map_err(|_| {
            Error::WorkerPanicked(format!("worker {} was dropped before it finished", self.id))
        })?
    }
}

/// A worker parked between turns
struct Actor<W: Worker> {
    id: WorkerId,
    /// Set while a turn is queued or running
    scheduled: AtomicBool,
    batch_size: usize,
    queue: flume::Sender<Task>,
    /// `None` once the worker has finished
    state: Mutex<Option<Running<W>>>,
}

struct Running<W: Worker> {
    worker: W,
    inbox: Receiver<Envelope<W::Message>>,
    ctx: WorkerContext,
    output: flume::Sender<Result<W::Output>>,
}

/// How a turn ended
enum Turn {
    /// The mailbox ran dry
    Idle,

    /// The batch was used up with mail still waiting
    Yield,

    /// The worker stopped or its mailbox closed
    Stop,

    /// The worker failed or panicked
    Failed(Error),
}

impl<W: Worker> Runnable for Actor<W> {
    fn run(self: Arc<Self>) {
        let mut state = self.state.lock();
        let turn = match state.as_mut() {
            Some(running) => running.turn(self.batch_size),
            None => return,
        };

        match turn {
            Turn::Idle | Turn::Yield => {
                // Cleared before looking at the mailbox again, so a sender
                // that enqueued after the look will queue the next turn.
                self.scheduled.store(false, Ordering::SeqCst);
                let pending = state.as_ref().map_or(false, |running| running.inbox.is_ready());
                drop(state);

                if pending {
                    self.wake();
                }
            }
            Turn::Stop => {
                let finished = state.take();
                drop(state);
                if let Some(running) = finished {
                    running.finish(None);
                }
            }
            Turn::Failed(err) => {
                let finished = state.take();
                drop(state);
                if let Some(running) = finished {
                    running.finish(Some(err));
                }
            }
        }
    }

    fn wake(self: Arc<Self>) {
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let task = Task::Run(Arc::clone(&self) as Arc<dyn Runnable>);
        if self.queue.send(task).is_err() {
            warn!(worker = self.id, "pool is gone; worker cannot run");
        }
    }
}

impl<W: Worker> Running<W> {
    /// Handle up to `batch_size` messages
    fn turn(&mut self, batch_size: usize) -> Turn {
        let Self {
            worker, inbox, ctx, ..
        } = self;

        let handled = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Turn> {
            for _ in 0..batch_size {
                match inbox.try_recv() {
                    Ok(Some(envelope)) => {
                        if worker.handle_message(ctx, envelope)? == Flow::Stop {
                            return Ok(Turn::Stop);
                        }
                    }
                    Ok(None) => return Ok(Turn::Idle),
                    Err(_) => {
                        worker.disconnected(ctx)?;
                        return Ok(Turn::Stop);
                    }
                }
            }
            Ok(Turn::Yield)
        }));

        match handled {
            Ok(Ok(turn)) => turn,
            Ok(Err(err)) => Turn::Failed(err),
            Err(payload) => Turn::Failed(Error::WorkerPanicked(panic_message(&*payload))),
        }
    }

    /// Shut the worker down and publish its output
    fn finish(self, failure: Option<Error>) {
        let Running {
            worker,
            inbox,
            ctx,
            output,
        } = self;

        // Anything still queued after a stop is discarded with the inbox.
        if !inbox.is_empty() {
            warn!(worker = ctx.id, pending = inbox.len(), "worker stopped with messages pending");
        }
        // Sends fail from here on, so nobody waits on a worker that is gone.
        drop(inbox);

        let result = match failure {
            None => panic::catch_unwind(AssertUnwindSafe(|| worker.shutdown(&ctx)))
                .unwrap_or_else(|payload| Err(Error::WorkerPanicked(panic_message(&*payload)))),
            Some(err) => {
                drop(worker);
                Err(err)
            }
        };

        debug!(worker = ctx.id, ok = result.is_ok(), "worker finished");
        let _ = output.send(result);

        // Releases this worker's barrier token.
        drop(ctx);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Worker panicked".to_string()
    }
}
