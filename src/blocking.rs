//! Mutex-guarded queue back-ends.
//!
//! These are the simple alternatives to [`TicketQueue`](crate::TicketQueue):
//! [`BlockingQueue`] is unbounded and relies on a condvar alone,
//! [`FixedQueue`] is bounded and gated by two plain [`CountingSignal`]s. Both
//! honour the same [`Queue`] contract, so a pool can be built over either.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, TryLockError};

use crate::queue::Queue;
use crate::signal::{CountingSignal, Signal};
use crate::{PopError, PushError};

struct BlockingInner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Unbounded mutex + condvar queue.
///
/// `try_push`/`try_pop` fail on lock contention rather than waiting, so they
/// stay non-blocking even against a held mutex.
pub struct BlockingQueue<T> {
    inner: Mutex<BlockingInner<T>>,
    ready: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BlockingInner {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Queue<T> for BlockingQueue<T> {
    fn push(&self, item: T) -> Result<(), PushError<T>> {
        {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            if inner.closed {
                return Err(PushError::Closed(item));
            }
            inner.items.push_back(item);
        }
        self.ready.notify_one();
        Ok(())
    }

    fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        match self.inner.try_lock() {
            Ok(mut inner) => {
                if inner.closed {
                    return Err(PushError::Closed(item));
                }
                inner.items.push_back(item);
                drop(inner);
                self.ready.notify_one();
                Ok(())
            }
            Err(TryLockError::WouldBlock) => Err(PushError::Full(item)),
            Err(TryLockError::Poisoned(_)) => panic!("queue mutex poisoned"),
        }
    }

    fn pop(&self) -> Result<T, PopError> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        while inner.items.is_empty() && !inner.closed {
            inner = self.ready.wait(inner).expect("queue condvar wait poisoned");
        }
        inner.items.pop_front().ok_or(PopError::Closed)
    }

    fn try_pop(&self) -> Result<T, PopError> {
        match self.inner.try_lock() {
            Ok(mut inner) => match inner.items.pop_front() {
                Some(item) => Ok(item),
                None if inner.closed => Err(PopError::Closed),
                None => Err(PopError::Empty),
            },
            Err(TryLockError::WouldBlock) => Err(PopError::Empty),
            Err(TryLockError::Poisoned(_)) => panic!("queue mutex poisoned"),
        }
    }

    fn close(&self) {
        {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            inner.closed = true;
        }
        self.ready.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().expect("queue mutex poisoned").closed
    }

    fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").items.len()
    }
}

/// Bounded queue gated by two counting signals around a mutex-guarded ring.
pub struct FixedQueue<T, S: Signal = CountingSignal> {
    open_slots: S,
    full_slots: S,
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T, S: Signal> FixedQueue<T, S> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be nonzero");
        Self {
            open_slots: S::with_count(capacity as u64),
            full_slots: S::with_count(0),
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn enqueue(&self, item: T) {
        self.items
            .lock()
            .expect("queue mutex poisoned")
            .push_back(item);
        self.full_slots.post();
    }

    fn dequeue(&self) -> T {
        let item = self
            .items
            .lock()
            .expect("queue mutex poisoned")
            .pop_front()
            .expect("full-slot permit without a queued item");
        self.open_slots.post();
        item
    }
}

impl<T: Send, S: Signal> Queue<T> for FixedQueue<T, S> {
    fn push(&self, item: T) -> Result<(), PushError<T>> {
        if self.is_closed() {
            return Err(PushError::Closed(item));
        }
        if !self.open_slots.wait() {
            return Err(PushError::Closed(item));
        }
        if self.is_closed() {
            // The open permit raced the close. Hand it back (a closed gate
            // discards it) instead of enqueueing an item no pop can reach.
            self.open_slots.post();
            return Err(PushError::Closed(item));
        }
        self.enqueue(item);
        Ok(())
    }

    fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        if self.is_closed() {
            return Err(PushError::Closed(item));
        }
        if !self.open_slots.try_wait() {
            return Err(if self.is_closed() {
                PushError::Closed(item)
            } else {
                PushError::Full(item)
            });
        }
        if self.is_closed() {
            self.open_slots.post();
            return Err(PushError::Closed(item));
        }
        self.enqueue(item);
        Ok(())
    }

    fn pop(&self) -> Result<T, PopError> {
        if !self.full_slots.wait() {
            return Err(PopError::Closed);
        }
        Ok(self.dequeue())
    }

    fn try_pop(&self) -> Result<T, PopError> {
        if !self.full_slots.try_wait() {
            return Err(if self.is_closed() && self.is_empty() {
                PopError::Closed
            } else {
                PopError::Empty
            });
        }
        Ok(self.dequeue())
    }

    fn close(&self) {
        self.open_slots.close();
        self.full_slots.close();
    }

    fn is_closed(&self) -> bool {
        self.full_slots.is_closed()
    }

    fn len(&self) -> usize {
        self.items.lock().expect("queue mutex poisoned").len()
    }
}
