//! Thread pool that runs the filter workers
//!
//! A run can create far more workers than the machine has threads, so
//! workers do not own threads. Each worker is a record holding its state and
//! its mailbox, and a fixed set of pool threads takes turns running whichever
//! records have mail waiting. A worker is only ever run by one pool thread
//! at a time.

use crate::error::{Error, Result};
use crate::worker::{Runnable, Spawner, Worker, WorkerHandle, WorkerId};
use crossbeam::sync::WaitGroup;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Prefix of pool thread names
pub const DEFAULT_THREAD_PREFIX: &str = "sieve";

/// Messages a worker handles before it gives its pool thread back
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Settings for a single pool thread
#[derive(Debug, Clone, Default)]
pub struct ThreadConfig {
    /// Thread name (for debugging/monitoring)
    pub name: Option<String>,

    /// CPU core to pin this thread to (None = no pinning)
    pub cpu_affinity: Option<usize>,

    /// Stack size for the thread (None = default)
    pub stack_size: Option<usize>,
}

impl ThreadConfig {
    /// Create a new thread configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set CPU affinity
    pub fn with_cpu_affinity(mut self, cpu: usize) -> Self {
        self.cpu_affinity = Some(cpu);
        self
    }

    /// Set stack size
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of threads in the pool
    pub num_threads: usize,

    /// Pool threads are named `{thread_prefix}-{index}`
    pub thread_prefix: String,

    /// Pin thread `i` to core `i % num_cpus`
    pub enable_cpu_affinity: bool,

    /// Stack size for pool threads (None = default)
    pub stack_size: Option<usize>,

    /// Messages a worker may handle in one turn on a pool thread
    pub batch_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get(),
            thread_prefix: DEFAULT_THREAD_PREFIX.to_string(),
            enable_cpu_affinity: false,
            stack_size: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of threads
    pub fn with_num_threads(mut self, num: usize) -> Self {
        self.num_threads = num;
        self
    }

    /// Set the thread name prefix
    pub fn with_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_prefix = prefix.into();
        self
    }

    /// Enable CPU affinity pinning
    pub fn with_cpu_affinity(mut self, enable: bool) -> Self {
        self.enable_cpu_affinity = enable;
        self
    }

    /// Set the thread stack size
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Set how many messages a worker handles per turn
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(Error::InvalidConfig(
                "pool needs at least one thread".to_string(),
            ));
        }
        if self.thread_prefix.is_empty() {
            return Err(Error::InvalidConfig(
                "thread prefix must not be empty".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings for pool thread `index`
    pub fn thread_config(&self, index: usize) -> ThreadConfig {
        let mut config = ThreadConfig::new().with_name(format!("{}-{}", self.thread_prefix, index));

        if self.enable_cpu_affinity {
            config = config.with_cpu_affinity(index % num_cpus::get());
        }

        if let Some(size) = self.stack_size {
            config = config.with_stack_size(size);
        }

        config
    }
}

/// Work handed to pool threads
pub(crate) enum Task {
    /// Give a worker a turn
    Run(Arc<dyn Runnable>),

    /// Leave the run loop
    Exit,
}

/// A fixed set of threads running workers on demand
///
/// Dropping the pool stops its threads once the tasks already queued have
/// run. Workers still waiting for mail at that point never run again, so
/// drop the pool only after every worker on it has finished.
pub struct WorkerPool {
    config: PoolConfig,
    queue: flume::Sender<Task>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start the pool threads
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let (queue, tasks) = flume::unbounded();
        let mut pool = Self {
            threads: Vec::with_capacity(config.num_threads),
            config,
            queue,
        };

        for index in 0..pool.config.num_threads {
            let thread_config = pool.config.thread_config(index);
            let tasks = tasks.clone();

            let mut thread_builder = thread::Builder::new();

            if let Some(name) = thread_config.name {
                thread_builder = thread_builder.name(name);
            }

            if let Some(stack_size) = thread_config.stack_size {
                thread_builder = thread_builder.stack_size(stack_size);
            }

            let cpu_affinity = thread_config.cpu_affinity;

            // On failure the threads started so far are stopped by `Drop`.
            let handle = thread_builder
                .spawn(move || {
                    if let Some(cpu) = cpu_affinity {
                        pin_to_core(index, cpu);
                    }
                    run_tasks(tasks);
                })
                .map_err(|e| Error::Spawn(e.to_string()))?;

            pool.threads.push(handle);
        }

        debug!(threads = pool.threads.len(), "worker pool started");
        Ok(pool)
    }

    /// Get the number of threads in the pool
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Something that can start workers on this pool
    pub fn spawner(&self) -> Spawner {
        Spawner::new(self.queue.clone(), self.config.batch_size)
    }

    /// Start a worker on this pool
    ///
    /// The worker keeps `barrier` until it has finished.
    pub fn spawn<W>(&self, worker: W, id: WorkerId, barrier: WaitGroup) -> WorkerHandle<W::Message, W::Output>
    where
        W: Worker,
    {
        self.spawner().spawn(worker, id, barrier)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for _ in &self.threads {
            let _ = self.queue.send(Task::Exit);
        }

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("pool thread panicked");
            }
        }
    }
}

fn run_tasks(tasks: flume::Receiver<Task>) {
    while let Ok(task) = tasks.recv() {
        match task {
            Task::Run(worker) => worker.run(),
            Task::Exit => break,
        }
    }
}

fn pin_to_core(index: usize, cpu: usize) {
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if let Some(core) = core_ids.get(cpu) {
            if !core_affinity::set_for_current(*core) {
                warn!(thread = index, cpu, "failed to pin pool thread to core");
            }
        }
    }
}
