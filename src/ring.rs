//! Lock-free bounded MPMC ring with per-thread reservation rows.
//!
//! Producers and consumers reserve tickets with `fetch_add` on monotonic
//! `head`/`tail` counters and publish their in-flight ticket in a per-thread
//! row. Instead of locking, each side bounds itself by scanning the other
//! side's rows for the minimum in-flight ticket:
//!
//! - a producer may write slot `i % capacity` only once every consumer has
//!   moved past `i - capacity`;
//! - a consumer may read slot `i % capacity` only once every producer has
//!   moved past `i`.
//!
//! A row holding [`SLOT_FREE`] means "no in-flight operation by this thread"
//! and drops out of the min-scan, leaving the bare `head`/`tail` counters as
//! the bound. Reading a stale row is safe in exactly one direction: a row can
//! only understate a thread's progress, which shrinks the window the scanner
//! computes.
//!
//! ABA cannot occur: tickets never repeat, and a slot is reused only after
//! both sides have advanced past its previous lap.
//!
//! # Thread identity
//!
//! Every participating thread must first register a stable, contiguous slot
//! id in `[0, max(producers, consumers))` via [`register_thread_slot`]. The
//! pool registers its workers automatically; client threads driving a
//! `RingQueue` directly must register themselves.

use std::cell::Cell;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_utils::CachePadded;

/// Reservation value meaning "no in-flight operation by this thread".
pub const SLOT_FREE: u64 = u64::MAX;

thread_local! {
    static THREAD_SLOT: Cell<usize> = const { Cell::new(usize::MAX) };
}

/// Assign the calling thread its contiguous slot id.
///
/// The id must stay stable for the thread's lifetime and must be unique
/// among all threads touching the same ring.
pub fn register_thread_slot(id: usize) {
    THREAD_SLOT.with(|slot| slot.set(id));
}

/// The calling thread's registered slot id, or `usize::MAX` if unset.
pub fn thread_slot() -> usize {
    THREAD_SLOT.with(|slot| slot.get())
}

struct ThreadRow {
    head: AtomicU64,
    tail: AtomicU64,
}

impl ThreadRow {
    fn new() -> Self {
        Self {
            head: AtomicU64::new(SLOT_FREE),
            tail: AtomicU64::new(SLOT_FREE),
        }
    }
}

/// Bounded lock-free MPMC ring queue.
///
/// `push` blocks (yielding) while the ring is full, `pop` while it is empty;
/// there is no closure — lifecycle belongs to whoever gates the ring (see
/// [`TicketQueue`](crate::TicketQueue) for the gated variant the pool uses).
pub struct RingQueue<T> {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    /// Cached lower bound on the producers' min in-flight ticket.
    last_head: CachePadded<AtomicU64>,
    /// Cached lower bound on the consumers' min in-flight ticket.
    last_tail: CachePadded<AtomicU64>,
    rows: Box<[CachePadded<ThreadRow>]>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: u64,
    producers: usize,
    consumers: usize,
}

unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}

impl<T> RingQueue<T> {
    /// Create a ring for `producers` pushing threads and `consumers` popping
    /// threads.
    ///
    /// # Panics
    ///
    /// Panics unless `capacity` is a nonzero power of two and both thread
    /// counts are nonzero.
    pub fn new(capacity: usize, producers: usize, consumers: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "ring capacity must be a nonzero power of two"
        );
        assert!(
            producers > 0 && consumers > 0,
            "ring needs at least one producer and one consumer"
        );
        let rows = (0..producers.max(consumers))
            .map(|_| CachePadded::new(ThreadRow::new()))
            .collect();
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            last_head: CachePadded::new(AtomicU64::new(0)),
            last_tail: CachePadded::new(AtomicU64::new(0)),
            rows,
            slots,
            mask: capacity as u64 - 1,
            producers,
            consumers,
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask as usize + 1
    }

    /// Snapshot of the number of queued items.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.saturating_sub(tail) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn row(&self) -> &ThreadRow {
        let id = thread_slot();
        assert!(
            id < self.rows.len(),
            "calling thread has no registered slot for this ring"
        );
        &self.rows[id]
    }

    /// Enqueue `item`, yielding while the ring is full.
    pub fn push(&self, item: T) {
        let row = self.row();
        // Two-step publication: consumers scanning the rows must never see a
        // value above the reservation this thread ends up holding.
        row.head.store(self.head.load(Ordering::SeqCst), Ordering::SeqCst);
        let ticket = self.head.fetch_add(1, Ordering::SeqCst);
        row.head.store(ticket, Ordering::SeqCst);

        let capacity = self.mask + 1;
        while ticket >= self.last_tail.load(Ordering::Relaxed) + capacity {
            let mut min = self.tail.load(Ordering::SeqCst);
            for other in self.rows[..self.consumers].iter() {
                // SLOT_FREE rows drop out of the min naturally.
                min = min.min(other.tail.load(Ordering::Acquire));
            }
            self.last_tail.store(min, Ordering::Relaxed);
            if ticket < min + capacity {
                break;
            }
            thread::yield_now();
        }

        unsafe { (*self.slots[(ticket & self.mask) as usize].get()).write(item) };

        // Releases the slot: consumers now see at least `ticket + 1` from us.
        row.head.store(SLOT_FREE, Ordering::Release);
    }

    /// Dequeue an item, yielding while the ring is empty.
    pub fn pop(&self) -> T {
        let row = self.row();
        row.tail.store(self.tail.load(Ordering::SeqCst), Ordering::SeqCst);
        let ticket = self.tail.fetch_add(1, Ordering::SeqCst);
        row.tail.store(ticket, Ordering::SeqCst);

        while ticket >= self.last_head.load(Ordering::Relaxed) {
            let mut min = self.head.load(Ordering::SeqCst);
            for other in self.rows[..self.producers].iter() {
                min = min.min(other.head.load(Ordering::Acquire));
            }
            self.last_head.store(min, Ordering::Relaxed);
            if ticket < min {
                break;
            }
            thread::yield_now();
        }

        let item = unsafe { (*self.slots[(ticket & self.mask) as usize].get()).assume_init_read() };

        // Releases the slot for producers a lap ahead.
        row.tail.store(SLOT_FREE, Ordering::Release);
        item
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        // Destroy exactly the still-initialised slots in [tail, head).
        let head = *self.head.get_mut();
        let mut tail = *self.tail.get_mut();
        while tail < head {
            unsafe { (*self.slots[(tail & self.mask) as usize].get()).assume_init_drop() };
            tail += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn single_thread_fifo() {
        register_thread_slot(0);
        let ring = RingQueue::new(4, 1, 1);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.pop(), 1);
        assert_eq!(ring.pop(), 2);
        assert_eq!(ring.pop(), 3);
        assert!(ring.is_empty());
    }

    #[test]
    fn wrap_around() {
        register_thread_slot(0);
        let ring = RingQueue::new(2, 1, 1);
        for lap in 0..10 {
            ring.push(lap);
            ring.push(lap + 1);
            assert_eq!(ring.pop(), lap);
            assert_eq!(ring.pop(), lap + 1);
        }
    }

    #[test]
    fn drop_destroys_queued_items() {
        register_thread_slot(0);
        let payload = Arc::new(());
        {
            let ring = RingQueue::new(4, 1, 1);
            ring.push(Arc::clone(&payload));
            ring.push(Arc::clone(&payload));
            assert_eq!(Arc::strong_count(&payload), 3);
        }
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn spsc_threads() {
        let ring = Arc::new(RingQueue::new(8, 1, 1));
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                register_thread_slot(0);
                for i in 0..10_000u64 {
                    ring.push(i);
                }
            })
        };
        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                register_thread_slot(0);
                let mut expected = 0u64;
                for _ in 0..10_000 {
                    assert_eq!(ring.pop(), expected);
                    expected += 1;
                }
            })
        };
        producer.join().unwrap();
        consumer.join().unwrap();
    }
}
