//! Counting signals.
//!
//! A counting signal is a non-negative counter supporting `post` (increment
//! and wake one waiter) and `wait` (decrement, parking until a count is
//! available), plus a one-way `close` that releases every waiter with
//! `false`.
//!
//! Two implementations share the [`Signal`] contract:
//!
//! - [`CountingSignal`]: mutex + condvar, the reference semantics.
//! - [`HybridSignal`]: atomic fast path that only touches the kernel once a
//!   waiter exhausts its spin budget. The counter is signed; a negative value
//!   of `-n` means `n` waiters are parked on the inner signal.

use std::hint;
use std::sync::atomic::{compiler_fence, AtomicBool, AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;

/// Spin iterations a [`HybridSignal`] waiter burns before parking.
///
/// A performance knob, not a correctness parameter: any non-negative budget
/// is correct, from 0 (pure mutex/condvar) to unbounded (pure spin). Lowering
/// it sends balanced producer/consumer pairs through the kernel on every
/// burst.
pub const SPIN_LIMIT: u32 = 10_000;

/// The contract shared by all counting signals.
///
/// Queue back-ends are generic over this trait so the gating discipline is
/// selectable by type parameter.
pub trait Signal: Send + Sync {
    /// Create a signal holding `count` initial permits.
    fn with_count(count: u64) -> Self
    where
        Self: Sized;

    /// Add one permit and wake one waiter.
    ///
    /// Posting to a closed signal is legal; the permit is lost.
    fn post(&self);

    /// Take one permit, parking until one is available or the signal closes.
    ///
    /// Returns `true` if a permit was consumed, `false` if the signal closed
    /// while no permit was available.
    fn wait(&self) -> bool;

    /// Non-blocking [`Signal::wait`]. Never decrements on failure.
    fn try_wait(&self) -> bool;

    /// [`Signal::wait`] bounded by `timeout`. A zero timeout behaves exactly
    /// as [`Signal::try_wait`]. Returns `true` only when terminated by a
    /// decrement, never on timeout or closure.
    fn wait_for(&self, timeout: Duration) -> bool;

    /// Close the signal and release every parked waiter with `false`.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

struct SignalState {
    count: u64,
    closed: bool,
}

/// Mutex + condvar counting signal.
pub struct CountingSignal {
    state: Mutex<SignalState>,
    cv: Condvar,
}

impl CountingSignal {
    pub fn new(count: u64) -> Self {
        Self {
            state: Mutex::new(SignalState {
                count,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn post(&self) {
        {
            let mut state = self.state.lock().expect("signal mutex poisoned");
            if state.closed {
                return;
            }
            state.count += 1;
        }
        self.cv.notify_one();
    }

    pub fn wait(&self) -> bool {
        let mut state = self.state.lock().expect("signal mutex poisoned");
        while state.count == 0 && !state.closed {
            state = self.cv.wait(state).expect("signal condvar wait poisoned");
        }
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    pub fn try_wait(&self) -> bool {
        let mut state = self.state.lock().expect("signal mutex poisoned");
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    /// Wait until `deadline` for a permit.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut state = self.state.lock().expect("signal mutex poisoned");
        while state.count == 0 && !state.closed {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            let (guard, result) = self
                .cv
                .wait_timeout(state, left)
                .expect("signal condvar wait poisoned");
            state = guard;
            if result.timed_out() {
                break;
            }
        }
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    pub fn wait_for(&self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return self.try_wait();
        }
        self.wait_until(Instant::now() + timeout)
    }

    pub fn close(&self) {
        {
            let mut state = self.state.lock().expect("signal mutex poisoned");
            state.closed = true;
        }
        self.cv.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("signal mutex poisoned").closed
    }

    /// Current permit count.
    pub fn count(&self) -> u64 {
        self.state.lock().expect("signal mutex poisoned").count
    }
}

impl Signal for CountingSignal {
    fn with_count(count: u64) -> Self {
        Self::new(count)
    }

    fn post(&self) {
        CountingSignal::post(self)
    }

    fn wait(&self) -> bool {
        CountingSignal::wait(self)
    }

    fn try_wait(&self) -> bool {
        CountingSignal::try_wait(self)
    }

    fn wait_for(&self, timeout: Duration) -> bool {
        CountingSignal::wait_for(self, timeout)
    }

    fn close(&self) {
        CountingSignal::close(self)
    }

    fn is_closed(&self) -> bool {
        CountingSignal::is_closed(self)
    }
}

/// Spin-then-park counting signal.
///
/// `count` is the net permit balance; when it is negative, `-count` waiters
/// are parked on `parked`. Posters that drive the counter up from a negative
/// value hand exactly one parked waiter its permit through the inner signal,
/// so the kernel path is only taken when producers and consumers are
/// genuinely out of balance.
pub struct HybridSignal {
    count: CachePadded<AtomicI64>,
    closed: AtomicBool,
    parked: CountingSignal,
}

impl HybridSignal {
    pub fn new(count: u64) -> Self {
        Self {
            count: CachePadded::new(AtomicI64::new(count as i64)),
            closed: AtomicBool::new(false),
            parked: CountingSignal::new(0),
        }
    }

    pub fn post(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let prev = self.count.fetch_add(1, Ordering::Release);
        if prev < 0 {
            self.parked.post();
        }
    }

    #[inline]
    pub fn try_wait(&self) -> bool {
        let cur = self.count.load(Ordering::Relaxed);
        cur > 0
            && self
                .count
                .compare_exchange(cur, cur - 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    pub fn wait(&self) -> bool {
        if self.try_wait() {
            return true;
        }
        if self.spin_for_permit() {
            return true;
        }
        let prev = self.count.fetch_sub(1, Ordering::Acquire);
        if prev <= 0 {
            // We are now registered as a parked waiter; a poster that saw the
            // negative count owes us one inner post.
            self.parked.wait()
        } else {
            true
        }
    }

    pub fn wait_for(&self, timeout: Duration) -> bool {
        if self.try_wait() {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        let deadline = Instant::now() + timeout;
        if self.spin_for_permit() {
            return true;
        }
        let prev = self.count.fetch_sub(1, Ordering::Acquire);
        if prev > 0 {
            return true;
        }
        if self.parked.wait_until(deadline) {
            return true;
        }
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        // Timed out with a waiter registration outstanding. Either retract it,
        // or a post raced the timeout and its permit is already in flight on
        // the inner signal; consume that one instead.
        loop {
            let cur = self.count.load(Ordering::Relaxed);
            if cur < 0 {
                if self
                    .count
                    .compare_exchange(cur, cur + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    return false;
                }
            } else if self.parked.try_wait() {
                return true;
            } else {
                thread::yield_now();
            }
        }
    }

    #[inline]
    fn spin_for_permit(&self) -> bool {
        let mut spin = SPIN_LIMIT;
        while spin > 0 {
            spin -= 1;
            let cur = self.count.load(Ordering::Relaxed);
            if cur > 0
                && self
                    .count
                    .compare_exchange(cur, cur - 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return true;
            }
            // Keeps the compiler from collapsing the loop into one load.
            compiler_fence(Ordering::Acquire);
            hint::spin_loop();
        }
        false
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.parked.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current counter value; negative magnitude is the parked waiter count.
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Signal for HybridSignal {
    fn with_count(count: u64) -> Self {
        Self::new(count)
    }

    fn post(&self) {
        HybridSignal::post(self)
    }

    fn wait(&self) -> bool {
        HybridSignal::wait(self)
    }

    fn try_wait(&self) -> bool {
        HybridSignal::try_wait(self)
    }

    fn wait_for(&self, timeout: Duration) -> bool {
        HybridSignal::wait_for(self, timeout)
    }

    fn close(&self) {
        HybridSignal::close(self)
    }

    fn is_closed(&self) -> bool {
        HybridSignal::is_closed(self)
    }
}
