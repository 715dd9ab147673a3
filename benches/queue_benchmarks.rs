use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_work_queue::limit::{run_limited, ConcurrencyLimit};
use rust_work_queue::prelude::*;
use rust_work_queue::rate_limit::{RateLimitConfig, RateLimiter};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn benchmark_queue_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_single_thread");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("put_get_1000", |b| {
        let queue = BoundedQueue::new(1000).expect("valid capacity");
        b.iter(|| {
            for i in 0..1000u64 {
                queue.put(i).expect("queue open");
            }
            for _ in 0..1000 {
                black_box(queue.get().expect("queue open"));
                queue.mark_done().expect("item was put");
            }
        });
    });

    group.finish();
}

fn benchmark_queue_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_handoff");

    for capacity in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(10_000));
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let queue = Arc::new(BoundedQueue::new(capacity).expect("valid capacity"));
                    let consumer = {
                        let queue = Arc::clone(&queue);
                        thread::spawn(move || {
                            let mut sum = 0u64;
                            while let Ok(item) = queue.get() {
                                sum = sum.wrapping_add(item);
                                let _ = queue.mark_done();
                            }
                            sum
                        })
                    };
                    for i in 0..10_000u64 {
                        queue.put(i).expect("queue open");
                    }
                    queue.close();
                    black_box(consumer.join().expect("consumer thread"));
                });
            },
        );
    }

    group.finish();
}

fn benchmark_supervisor(c: &mut Criterion) {
    let mut group = c.benchmark_group("supervisor");
    group.sample_size(20);

    for workers in [1usize, 4, 8] {
        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(
            BenchmarkId::new("lightweight_items_1000", workers),
            &workers,
            |b, &workers| {
                b.iter(|| {
                    let supervisor = Supervisor::new(SupervisorConfig::new(64, workers))
                        .expect("valid config");
                    let report = supervisor
                        .run(
                            |producer: &Producer<u64>| producer.put_all(0..1000),
                            |x: u64| -> Result<u64> { Ok(black_box(x.wrapping_mul(31))) },
                        )
                        .expect("run starts");
                    black_box(report.succeeded);
                });
            },
        );
    }

    group.bench_function("first_failure_of_1000", |b| {
        b.iter(|| {
            let supervisor =
                Supervisor::new(SupervisorConfig::new(64, 4)).expect("valid config");
            let report = supervisor
                .run(
                    |producer: &Producer<u64>| producer.put_all(0..1000),
                    |x: u64| -> Result<u64> {
                        if x == 10 {
                            Err(WorkError::other("stop"))
                        } else {
                            Ok(x)
                        }
                    },
                )
                .expect("run starts");
            black_box(report.abandoned);
        });
    });

    group.finish();
}

fn benchmark_limits(c: &mut Criterion) {
    let mut group = c.benchmark_group("limits");

    group.bench_function("run_limited_100", |b| {
        let limit = ConcurrencyLimit::new(4).expect("valid permits");
        b.iter(|| {
            let results = run_limited(&limit, 0..100u64, |i| {
                thread::sleep(Duration::from_micros(10));
                i * 2
            })
            .expect("no panics");
            black_box(results);
        });
    });

    group.bench_function("rate_limit_check", |b| {
        let limiter = RateLimiter::new(RateLimitConfig::new(u32::MAX).with_ttl(Duration::from_secs(60)))
            .expect("valid config");
        b.iter(|| {
            black_box(limiter.check_identity(black_box("bench-user")).is_ok());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_queue_single_thread,
    benchmark_queue_handoff,
    benchmark_supervisor,
    benchmark_limits
);
criterion_main!(benches);
