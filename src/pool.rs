//! Multi-queue work-stealing thread pool.
//!
//! The pool owns `Q` independent queues and `W >= Q` worker threads. A
//! submission takes a rotating index and offers the task to up to
//! `STEAL_ROUNDS * Q` queues with `try_push` before blocking on the indexed
//! queue. Worker `w` is affiliated with home queue `w % Q`: it sweeps
//! the queues from home outward with `try_pop` (work stealing) and only parks
//! on its home queue's blocking `pop` when the sweep comes up empty.
//!
//! Shutdown is deterministic: dropping the pool closes every queue, which
//! releases all parked workers; each worker drains what it can and exits on
//! the first `Closed` pop. Every task committed to a queue before the close
//! is executed exactly once.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, error};

use crate::queue::Queue;
use crate::ring;
use crate::task::{JoinHandle, Task};
use crate::ticket::TicketQueue;
use crate::{PopError, PushError};

/// Laps of the queue array a submission or a stealing worker makes with
/// non-blocking operations before falling back to a blocking one.
pub const STEAL_ROUNDS: usize = 2;

/// Pool construction failure.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Zero workers, or fewer workers than queues.
    #[error("invalid worker count {workers} for {queues} queues (need workers >= queues >= 1)")]
    InvalidWorkerCount { workers: usize, queues: usize },
    /// Zero queues.
    #[error("invalid queue count: 0")]
    InvalidQueueCount,
    /// Queue capacity that is zero or not a power of two.
    #[error("invalid queue capacity {0} (must be a nonzero power of two)")]
    InvalidCapacity(usize),
    /// The operating system refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct PoolShared<Q> {
    queues: Box<[Q]>,
    index: AtomicUsize,
}

/// Multi-queue work-stealing thread pool.
///
/// Generic over any [`Queue`] back-end; the default is
/// [`TicketQueue<Task>`].
pub struct ThreadPool<Q: Queue<Task> + 'static = TicketQueue<Task>> {
    shared: Arc<PoolShared<Q>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ThreadPool<TicketQueue<Task>> {
    /// Build a pool of `workers` threads over `queues` ticket queues of
    /// `capacity` slots each.
    pub fn new(workers: usize, queues: usize, capacity: usize) -> Result<Self, PoolError> {
        if !capacity.is_power_of_two() {
            return Err(PoolError::InvalidCapacity(capacity));
        }
        Self::with_queues(workers, queues, || TicketQueue::new(capacity))
    }
}

impl<Q: Queue<Task> + 'static> ThreadPool<Q> {
    /// Build a pool over queues produced by `make`, one call per queue.
    pub fn with_queues(
        workers: usize,
        queues: usize,
        mut make: impl FnMut() -> Q,
    ) -> Result<Self, PoolError> {
        if queues == 0 {
            return Err(PoolError::InvalidQueueCount);
        }
        if workers == 0 || workers < queues {
            return Err(PoolError::InvalidWorkerCount { workers, queues });
        }

        let shared = Arc::new(PoolShared {
            queues: (0..queues).map(|_| make()).collect(),
            index: AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("ringpool-worker-{worker}"))
                .spawn(move || worker_loop(&shared, worker))?;
            handles.push(handle);
        }

        Ok(Self {
            shared,
            workers: handles,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn queue_count(&self) -> usize {
        self.shared.queues.len()
    }

    /// Submit a fire-and-forget task.
    ///
    /// Blocks only when every queue is full. Must not be called once the
    /// pool has started dropping; a task racing the close is silently
    /// dropped.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::new(f));
    }

    /// Submit a task and get a handle that resolves to its return value once
    /// it has executed. Panics raised by `f` propagate through
    /// [`JoinHandle::join`], not through the worker.
    pub fn spawn_with_handle<R, F>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, handle) = Task::with_handle(f);
        self.submit(task);
        handle
    }

    fn submit(&self, mut task: Task) {
        let queue_count = self.shared.queues.len();
        let index = self.shared.index.fetch_add(1, Ordering::Relaxed);

        for offset in 0..queue_count * STEAL_ROUNDS {
            match self.shared.queues[index.wrapping_add(offset) % queue_count].try_push(task) {
                Ok(()) => return,
                Err(PushError::Full(t)) | Err(PushError::Closed(t)) => task = t,
            }
        }

        // Every queue was full or busy; block on the indexed queue. Losing
        // the race against close drops the task.
        let _ = self.shared.queues[index % queue_count].push(task);
    }
}

impl<Q: Queue<Task> + 'static> Drop for ThreadPool<Q> {
    fn drop(&mut self) {
        debug!(queues = self.shared.queues.len(), "closing pool");
        for queue in self.shared.queues.iter() {
            queue.close();
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

fn worker_loop<Q: Queue<Task>>(shared: &PoolShared<Q>, worker: usize) {
    let queue_count = shared.queues.len();
    let home = worker % queue_count;
    ring::register_thread_slot(worker);
    debug!(worker, home, "worker started");

    loop {
        let mut task = None;
        for offset in 0..queue_count * STEAL_ROUNDS {
            if let Ok(t) = shared.queues[(home + offset) % queue_count].try_pop() {
                task = Some(t);
                break;
            }
        }

        let task = match task {
            Some(task) => task,
            None => match shared.queues[home].pop() {
                Ok(task) => task,
                Err(PopError::Closed) | Err(PopError::Empty) => break,
            },
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
            // Futured tasks capture their own panic; only fire-and-forget
            // tasks land here.
            error!(worker, panic = %panic_message(&payload), "task panicked");
        }
    }

    debug!(worker, "worker exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
