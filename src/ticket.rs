//! Bounded MPMC queue ordered by atomic tickets and gated by counting
//! signals.
//!
//! Capacity accounting lives entirely in two [`Signal`]s: `open_slots`
//! (initially the capacity) admits producers, `full_slots` (initially zero)
//! admits consumers. Under the gates the ring itself needs no locks:
//!
//! 1. `fetch_add` on the issuing counter hands out a ticket;
//! 2. the element is constructed/moved in slot `ticket % capacity`;
//! 3. the thread yields until the commit counter reaches its ticket, then
//!    advances it by one.
//!
//! Commit counters therefore advance strictly in ticket order even though
//! element construction completes out of order across threads, which keeps
//! the queue FIFO per ticket stream. A slot is valid exactly while
//! `pop_commit <= ticket < push_commit`; both sides wait on that window
//! before touching the slot.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_utils::CachePadded;

use crate::queue::Queue;
use crate::signal::{HybridSignal, Signal};
use crate::{PopError, PushError};

/// Bounded MPMC ticket queue, the pool's default back-end.
///
/// Generic over the gating [`Signal`]; the default [`HybridSignal`] keeps
/// balanced producer/consumer pairs out of the kernel.
pub struct TicketQueue<T, S: Signal = HybridSignal> {
    open_slots: S,
    full_slots: S,
    push_ticket: CachePadded<AtomicU64>,
    pop_ticket: CachePadded<AtomicU64>,
    push_commit: CachePadded<AtomicU64>,
    pop_commit: CachePadded<AtomicU64>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: u64,
}

unsafe impl<T: Send, S: Signal> Send for TicketQueue<T, S> {}
unsafe impl<T: Send, S: Signal> Sync for TicketQueue<T, S> {}

impl<T, S: Signal> TicketQueue<T, S> {
    /// # Panics
    ///
    /// Panics unless `capacity` is a nonzero power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "queue capacity must be a nonzero power of two"
        );
        Self {
            open_slots: S::with_count(capacity as u64),
            full_slots: S::with_count(0),
            push_ticket: CachePadded::new(AtomicU64::new(0)),
            pop_ticket: CachePadded::new(AtomicU64::new(0)),
            push_commit: CachePadded::new(AtomicU64::new(0)),
            pop_commit: CachePadded::new(AtomicU64::new(0)),
            slots: (0..capacity)
                .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
                .collect(),
            mask: capacity as u64 - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask as usize + 1
    }

    /// Runs under an `open_slots` permit.
    fn commit_push(&self, item: T) {
        let ticket = self.push_ticket.fetch_add(1, Ordering::Relaxed);
        if ticket > self.mask {
            // The permit bounds in-flight pushes, but the previous occupant
            // of this slot may still be on its way out.
            let reusable_from = ticket - self.mask;
            while self.pop_commit.load(Ordering::Acquire) < reusable_from {
                thread::yield_now();
            }
        }
        unsafe { (*self.slots[(ticket & self.mask) as usize].get()).write(item) };
        while self.push_commit.load(Ordering::Acquire) != ticket {
            thread::yield_now();
        }
        self.push_commit.store(ticket + 1, Ordering::Release);
    }

    /// Runs under a `full_slots` permit.
    fn commit_pop(&self) -> T {
        let ticket = self.pop_ticket.fetch_add(1, Ordering::Relaxed);
        // The slot is valid only once the producer holding this ticket has
        // committed.
        while self.push_commit.load(Ordering::Acquire) <= ticket {
            thread::yield_now();
        }
        let item = unsafe { (*self.slots[(ticket & self.mask) as usize].get()).assume_init_read() };
        while self.pop_commit.load(Ordering::Acquire) != ticket {
            thread::yield_now();
        }
        self.pop_commit.store(ticket + 1, Ordering::Release);
        item
    }
}

impl<T: Send, S: Signal> Queue<T> for TicketQueue<T, S> {
    fn push(&self, item: T) -> Result<(), PushError<T>> {
        if self.is_closed() {
            return Err(PushError::Closed(item));
        }
        if !self.open_slots.wait() {
            return Err(PushError::Closed(item));
        }
        if self.is_closed() {
            // The open permit raced the close. Hand it back (a closed gate
            // discards it) instead of committing a slot no pop can reach.
            self.open_slots.post();
            return Err(PushError::Closed(item));
        }
        self.commit_push(item);
        self.full_slots.post();
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
        self.commit_push(item);
        self.full_slots.post();
        Ok(())
    }

    fn pop(&self) -> Result<T, PopError> {
        if !self.full_slots.wait() {
            return Err(PopError::Closed);
        }
        let item = self.commit_pop();
        self.open_slots.post();
        Ok(item)
    }

    fn try_pop(&self) -> Result<T, PopError> {
        if !self.full_slots.try_wait() {
            return Err(if self.is_closed() && self.is_empty() {
                PopError::Closed
            } else {
                PopError::Empty
            });
        }
        let item = self.commit_pop();
        self.open_slots.post();
        Ok(item)
    }

    fn close(&self) {
        self.open_slots.close();
        self.full_slots.close();
    }

    fn is_closed(&self) -> bool {
        self.full_slots.is_closed()
    }

    fn len(&self) -> usize {
        let head = self.push_commit.load(Ordering::Acquire);
        let tail = self.pop_commit.load(Ordering::Acquire);
        head.saturating_sub(tail) as usize
    }
}

impl<T, S: Signal> Drop for TicketQueue<T, S> {
    fn drop(&mut self) {
        // Destroy exactly the committed-but-unpopped slots.
        let head = *self.push_commit.get_mut();
        let mut tail = *self.pop_commit.get_mut();
        while tail != head {
            unsafe { (*self.slots[(tail & self.mask) as usize].get()).assume_init_drop() };
            tail += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::CountingSignal;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_single_thread() {
        let q: TicketQueue<u32> = TicketQueue::new(4);
        q.try_push(1).unwrap();
        q.try_push(2).unwrap();
        q.try_push(3).unwrap();
        assert_eq!(q.len(), 3);
        assert_eq!(q.try_pop(), Ok(1));
        assert_eq!(q.try_pop(), Ok(2));
        assert_eq!(q.try_pop(), Ok(3));
        assert_eq!(q.try_pop(), Err(PopError::Empty));
    }

    #[test]
    fn try_push_observes_capacity() {
        let q: TicketQueue<u32> = TicketQueue::new(2);
        q.try_push(1).unwrap();
        q.try_push(2).unwrap();
        assert_eq!(q.try_push(3), Err(PushError::Full(3)));
        assert_eq!(q.try_pop(), Ok(1));
        q.try_push(3).unwrap();
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let q: TicketQueue<u32> = TicketQueue::new(4);
        q.try_push(7).unwrap();
        q.try_push(8).unwrap();
        q.close();
        assert!(q.is_closed());
        // Spare capacity remains, but a closed queue refuses both push paths.
        assert_eq!(q.try_push(9), Err(PushError::Closed(9)));
        assert_eq!(q.push(10), Err(PushError::Closed(10)));
        assert_eq!(q.try_pop(), Ok(7));
        assert_eq!(q.try_pop(), Ok(8));
        assert_eq!(q.try_pop(), Err(PopError::Closed));
        assert_eq!(q.pop(), Err(PopError::Closed));
    }

    #[test]
    fn blocking_pop_released_by_close() {
        let q: Arc<TicketQueue<u32>> = Arc::new(TicketQueue::new(4));
        let popper = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(10));
        q.close();
        assert_eq!(popper.join().unwrap(), Err(PopError::Closed));
    }

    #[test]
    fn counting_signal_gate_variant() {
        let q: TicketQueue<u32, CountingSignal> = TicketQueue::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.try_push(3), Err(PushError::Full(3)));
        assert_eq!(q.pop(), Ok(1));
        assert_eq!(q.pop(), Ok(2));
    }

    #[test]
    fn drop_destroys_committed_slots() {
        let payload = Arc::new(());
        {
            let q: TicketQueue<Arc<()>> = TicketQueue::new(4);
            q.try_push(Arc::clone(&payload)).unwrap();
            q.try_push(Arc::clone(&payload)).unwrap();
            q.try_push(Arc::clone(&payload)).unwrap();
            let _ = q.try_pop().unwrap();
            assert_eq!(Arc::strong_count(&payload), 3);
        }
        assert_eq!(Arc::strong_count(&payload), 1);
    }
}
