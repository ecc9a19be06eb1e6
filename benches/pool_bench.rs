use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ringpool::{Queue, ThreadPool, TicketQueue};

fn ticket_queue_spsc(c: &mut Criterion) {
    const ITEMS: usize = 100_000;

    let mut group = c.benchmark_group("ticket_queue_spsc");
    group.throughput(Throughput::Elements(ITEMS as u64));
    group.bench_function("push_pop_100k", |b| {
        b.iter(|| {
            let queue: Arc<TicketQueue<usize>> = Arc::new(TicketQueue::new(1024));
            let consumer = {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut sum = 0usize;
                    for _ in 0..ITEMS {
                        sum = sum.wrapping_add(queue.pop().unwrap());
                    }
                    sum
                })
            };
            for i in 0..ITEMS {
                queue.push(i).unwrap();
            }
            consumer.join().unwrap()
        })
    });
    group.finish();
}

fn pool_throughput(c: &mut Criterion) {
    const TASKS: usize = 50_000;

    let mut group = c.benchmark_group("pool_throughput");
    group.throughput(Throughput::Elements(TASKS as u64));
    for (workers, queues) in [(2, 2), (4, 4)] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{workers}w{queues}q")),
            &(workers, queues),
            |b, &(workers, queues)| {
                b.iter(|| {
                    let counter = Arc::new(AtomicUsize::new(0));
                    {
                        let pool = ThreadPool::new(workers, queues, 256).unwrap();
                        for _ in 0..TASKS {
                            let counter = Arc::clone(&counter);
                            pool.spawn(move || {
                                counter.fetch_add(1, Ordering::Relaxed);
                            });
                        }
                    }
                    assert_eq!(counter.load(Ordering::Relaxed), TASKS);
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, ticket_queue_spsc, pool_throughput);
criterion_main!(benches);
