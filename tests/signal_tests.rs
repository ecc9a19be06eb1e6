//! Counting-law and wake-up tests for the signal primitives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use ringpool::{CountingSignal, HybridSignal, Signal};

/// For `P` posts interleaved with `W` waits on a signal with initial count
/// `c`, the number of waits returning `true` before closure is
/// `min(c + P, W)`.
fn counting_law<S: Signal + 'static>(signal: S, initial: u64, posts: u64, waiters: u64) {
    let signal = Arc::new(signal);
    let granted = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(waiters as usize + 1));

    let threads: Vec<_> = (0..waiters)
        .map(|_| {
            let signal = Arc::clone(&signal);
            let granted = Arc::clone(&granted);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                if signal.wait() {
                    granted.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    start.wait();
    for _ in 0..posts {
        signal.post();
    }

    // Give every satisfiable waiter time to consume its permit, then release
    // the rest with `false`.
    let expected = (initial + posts).min(waiters) as usize;
    let deadline = Instant::now() + Duration::from_secs(5);
    while granted.load(Ordering::Relaxed) < expected && Instant::now() < deadline {
        thread::yield_now();
    }
    signal.close();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(granted.load(Ordering::Relaxed), expected);
}

#[test]
fn counting_signal_law_waiters_starved() {
    counting_law(CountingSignal::new(2), 2, 3, 8);
}

#[test]
fn counting_signal_law_posts_in_excess() {
    counting_law(CountingSignal::new(0), 0, 6, 4);
}

#[test]
fn hybrid_signal_law_waiters_starved() {
    counting_law(HybridSignal::new(2), 2, 3, 8);
}

#[test]
fn hybrid_signal_law_posts_in_excess() {
    counting_law(HybridSignal::new(0), 0, 6, 4);
}

/// A parked waiter is woken by a post and consumes exactly one permit.
#[test]
fn hybrid_post_wakes_waiter_and_balances() {
    let signal = Arc::new(HybridSignal::new(0));
    let waiter = {
        let signal = Arc::clone(&signal);
        thread::spawn(move || signal.wait())
    };
    thread::sleep(Duration::from_millis(10));
    signal.post();
    assert!(waiter.join().unwrap());
    assert_eq!(signal.count(), 0);
}

/// Closing releases a parked waiter with `false` within bounded time.
#[test]
fn hybrid_close_releases_waiter_quickly() {
    let signal = Arc::new(HybridSignal::new(0));
    let waiter = {
        let signal = Arc::clone(&signal);
        thread::spawn(move || signal.wait())
    };
    thread::sleep(Duration::from_millis(10));
    let start = Instant::now();
    signal.close();
    assert!(!waiter.join().unwrap());
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn counting_close_releases_all_waiters() {
    let signal = Arc::new(CountingSignal::new(0));
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait())
        })
        .collect();
    thread::sleep(Duration::from_millis(10));
    signal.close();
    for waiter in waiters {
        assert!(!waiter.join().unwrap());
    }
}

/// A failed `try_wait` never decrements the counter observed from outside.
#[test]
fn no_spurious_decrement() {
    let hybrid = HybridSignal::new(0);
    for _ in 0..100 {
        assert!(!hybrid.try_wait());
    }
    assert_eq!(hybrid.count(), 0);
    hybrid.post();
    assert!(hybrid.try_wait());
    assert!(!hybrid.try_wait());
    assert_eq!(hybrid.count(), 0);

    let counting = CountingSignal::new(0);
    assert!(!counting.try_wait());
    assert_eq!(counting.count(), 0);
}

/// Zero timeout is exactly a try; nonzero timeouts are honoured.
#[test]
fn wait_for_semantics() {
    let signal = HybridSignal::new(1);
    assert!(signal.wait_for(Duration::ZERO));
    assert!(!signal.wait_for(Duration::ZERO));

    let start = Instant::now();
    assert!(!signal.wait_for(Duration::from_millis(30)));
    assert!(start.elapsed() >= Duration::from_millis(30));
    // The timed-out waiter must have retracted its registration.
    assert_eq!(signal.count(), 0);
}

/// A post racing a timed wait is consumed, not lost.
#[test]
fn wait_for_consumes_racing_post() {
    let signal = Arc::new(HybridSignal::new(0));
    let waiter = {
        let signal = Arc::clone(&signal);
        thread::spawn(move || signal.wait_for(Duration::from_secs(5)))
    };
    thread::sleep(Duration::from_millis(10));
    signal.post();
    assert!(waiter.join().unwrap());
    assert_eq!(signal.count(), 0);
}
