//! Prime-counting workload: `primes [rounds] [workers] [queues]`.
//!
//! Each round enqueues a trial-division primality check for every odd number
//! below 100, then the pool is dropped and the total prime count and wall
//! clock are reported.

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ringpool::ThreadPool;

fn is_prime(n: u32) -> bool {
    (2..=n / 2).all(|d| n % d != 0)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = env::args().skip(1);
    let rounds: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(100_000);
    let workers: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(2);
    let queues: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(2);

    let primes = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    {
        let pool = match ThreadPool::new(workers, queues, 4) {
            Ok(pool) => pool,
            Err(err) => {
                eprintln!("cannot build pool: {err}");
                std::process::exit(1);
            }
        };
        for _ in 0..rounds {
            for n in (3..100u32).step_by(2) {
                let primes = Arc::clone(&primes);
                pool.spawn(move || {
                    if is_prime(n) {
                        primes.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        }
        println!("Enqueue ended. Stopping pool...");
    }
    println!(
        "{} rounds: {} primes",
        rounds,
        primes.load(Ordering::Relaxed)
    );
    println!("Duration: {}ms.", start.elapsed().as_millis());
}
