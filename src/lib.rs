//! # ringpool
//!
//! A work-stealing thread pool built over bounded multi-producer
//! multi-consumer queues, synchronised by a hybrid (spin + kernel) counting
//! signal.
//!
//! The crate is layered bottom-up:
//!
//! - [`signal`]: [`CountingSignal`] (mutex + condvar reference semantics) and
//!   [`HybridSignal`] (user-space spin/CAS fast path with a sign-tracking
//!   counter; the kernel is only involved once a waiter actually parks).
//! - [`ring`]: [`RingQueue`], a bounded lock-free MPMC ring that coordinates
//!   through per-thread reservation rows instead of locks.
//! - [`ticket`]: [`TicketQueue`], a bounded MPMC ring ordered by atomic
//!   tickets and gated by two counting signals. This is the queue the pool
//!   runs on.
//! - [`blocking`]: [`BlockingQueue`] and [`FixedQueue`], mutex-guarded
//!   back-ends honouring the same [`Queue`] contract.
//! - [`pool`]: [`ThreadPool`], which spreads submissions across several
//!   queues with a rotating index and lets workers steal from neighbouring
//!   queues before parking on their own.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use ringpool::ThreadPool;
//!
//! let counter = Arc::new(AtomicUsize::new(0));
//! {
//!     let pool = ThreadPool::new(4, 2, 64).unwrap();
//!     for _ in 0..1000 {
//!         let counter = Arc::clone(&counter);
//!         pool.spawn(move || {
//!             counter.fetch_add(1, Ordering::Relaxed);
//!         });
//!     }
//!     // Dropping the pool closes every queue, drains committed tasks and
//!     // joins the workers.
//! }
//! assert_eq!(counter.load(Ordering::Relaxed), 1000);
//! ```

pub mod blocking;
pub mod pool;
pub mod queue;
pub mod ring;
pub mod signal;
pub mod task;
pub mod ticket;

pub use blocking::{BlockingQueue, FixedQueue};
pub use pool::{PoolError, ThreadPool, STEAL_ROUNDS};
pub use queue::Queue;
pub use ring::RingQueue;
pub use signal::{CountingSignal, HybridSignal, Signal};
pub use task::{JoinHandle, Task};
pub use ticket::TicketQueue;

/// Error occurring when pushing into a queue is unsuccessful.
///
/// The rejected item is handed back so the caller can retry or drop it.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum PushError<T> {
    /// The queue is full.
    #[error("queue is full")]
    Full(T),
    /// The queue has been closed.
    #[error("queue is closed")]
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the item that could not be pushed.
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Closed(item) => item,
        }
    }
}

/// Error occurring when popping from a queue is unsuccessful.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum PopError {
    /// The queue is empty.
    #[error("queue is empty")]
    Empty,
    /// The queue has been closed and fully drained.
    #[error("queue is closed")]
    Closed,
}
