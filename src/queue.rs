//! The queue contract the pool abstracts over.

use crate::{PopError, PushError};

/// A closable MPMC queue.
///
/// Conforming back-ends: [`TicketQueue`](crate::TicketQueue) (atomic
/// ticketed, signal gated), [`BlockingQueue`](crate::BlockingQueue)
/// (mutex/condvar, unbounded) and [`FixedQueue`](crate::FixedQueue)
/// (mutex-guarded, signal gated). [`RingQueue`](crate::RingQueue) is not a
/// back-end: its per-thread reservation protocol is specific to it and
/// deliberately kept out of this contract.
pub trait Queue<T>: Send + Sync {
    /// Enqueue `item`, blocking while the queue is full.
    ///
    /// Fails only with [`PushError::Closed`]; the item is handed back.
    fn push(&self, item: T) -> Result<(), PushError<T>>;

    /// Enqueue `item` without blocking.
    fn try_push(&self, item: T) -> Result<(), PushError<T>>;

    /// Dequeue an item, blocking while the queue is empty.
    ///
    /// Fails with [`PopError::Closed`] once the queue is closed and fully
    /// drained; items enqueued before closure remain poppable.
    fn pop(&self) -> Result<T, PopError>;

    /// Dequeue an item without blocking.
    fn try_pop(&self) -> Result<T, PopError>;

    /// Close the queue: release every parked waiter and refuse new pushes.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Snapshot of the number of queued items.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
