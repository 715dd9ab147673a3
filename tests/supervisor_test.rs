//! End-to-end tests for supervised runs

use rust_work_queue::prelude::*;
use rust_work_queue::supervisor::SupervisorState;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn accounted<R>(report: &Report<R>) -> bool {
    report.succeeded + report.failed + report.abandoned == report.produced
}

#[test]
fn test_all_items_processed_once() {
    // C=3, 10 items, 2 consumers
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);

    let supervisor = Supervisor::new(SupervisorConfig::new(3, 2)).expect("valid config");
    let report = supervisor
        .run(
            |producer: &Producer<u32>| producer.put_all(1..=10),
            move |item: u32| -> Result<u32> {
                seen_clone.lock().unwrap().push(item);
                thread::sleep(Duration::from_millis(2));
                Ok(item)
            },
        )
        .expect("run should start");

    assert!(report.is_success());
    assert_eq!(report.produced, 10);
    assert_eq!(report.succeeded, 10);
    assert_eq!(report.failed, 0);
    assert_eq!(report.abandoned, 0);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 10);
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(unique, (1..=10).collect());

    let sequences: Vec<u64> = report.outputs.iter().map(|(s, _)| *s).collect();
    assert_eq!(sequences, (1..=10).collect::<Vec<u64>>());
    assert!(report
        .worker_states
        .iter()
        .all(|s| *s == WorkerState::Completed));
    assert_eq!(supervisor.state(), SupervisorState::Done);
}

#[test]
fn test_first_failure_abandons_rest() {
    // C=5, 5 items, 1 consumer failing on item 3
    let calls = Arc::new(Mutex::new(Vec::new()));
    let calls_clone = Arc::clone(&calls);

    let supervisor = Supervisor::new(SupervisorConfig::new(5, 1)).unwrap();
    let report = supervisor
        .run(
            |producer: &Producer<u32>| producer.put_all(1..=5),
            move |item: u32| -> Result<u32> {
                // let the producer fill the queue before anything fails
                thread::sleep(Duration::from_millis(20));
                calls_clone.lock().unwrap().push(item);
                if item == 3 {
                    return Err(WorkError::other("cannot handle 3"));
                }
                Ok(item * 100)
            },
        )
        .unwrap();

    assert_eq!(*calls.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(report.outputs, vec![(1, 100), (2, 200)]);
    assert_eq!(report.produced, 5);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.abandoned, 2);
    assert!(accounted(&report));

    let failure = report.failure.as_ref().expect("run should fail");
    assert_eq!(failure.sequence(), Some(3));
    assert!(matches!(failure.root_cause(), WorkError::Other(_)));
    assert!(report.secondary_failures.is_empty());

    match report.into_result() {
        Err(WorkError::HandlerFailure { sequence, .. }) => assert_eq!(sequence, 3),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_single_worker_is_fifo() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let order_clone = Arc::clone(&order);

    let supervisor = Supervisor::new(SupervisorConfig::new(2, 1)).unwrap();
    let report = supervisor
        .run(
            |producer: &Producer<u32>| producer.put_all(0..50),
            move |item: u32| -> Result<()> {
                order_clone.lock().unwrap().push(item);
                Ok(())
            },
        )
        .unwrap();

    assert!(report.is_success());
    assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
}

#[test]
fn test_producer_finishing_first_loses_nothing() {
    // The producer fills the queue and returns before any worker is free.
    let gate = Arc::new(AtomicBool::new(false));
    let gate_clone = Arc::clone(&gate);

    let supervisor = Supervisor::new(SupervisorConfig::new(8, 2)).unwrap();
    let report = supervisor
        .run(
            move |producer: &Producer<u32>| {
                producer.put_all(0..8)?;
                gate_clone.store(true, Ordering::SeqCst);
                Ok(())
            },
            move |item: u32| -> Result<u32> {
                while !gate.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(item)
            },
        )
        .unwrap();

    assert_eq!(report.produced, 8);
    assert_eq!(report.succeeded, 8);
}

#[test]
fn test_backpressure_blocks_producer() {
    // With C=1 and slow consumers the producer can never be more than
    // capacity + workers items ahead of the completed count.
    let completed = Arc::new(AtomicUsize::new(0));
    let max_lead = Arc::new(AtomicUsize::new(0));
    let completed_producer = Arc::clone(&completed);
    let max_lead_producer = Arc::clone(&max_lead);
    let completed_handler = Arc::clone(&completed);

    let supervisor = Supervisor::new(SupervisorConfig::new(1, 2)).unwrap();
    let report = supervisor
        .run(
            move |producer: &Producer<u32>| {
                for i in 0..20 {
                    producer.put(i)?;
                    let lead = producer.produced() as usize
                        - completed_producer.load(Ordering::SeqCst);
                    max_lead_producer.fetch_max(lead, Ordering::SeqCst);
                }
                Ok(())
            },
            move |item: u32| -> Result<u32> {
                thread::sleep(Duration::from_millis(5));
                completed_handler.fetch_add(1, Ordering::SeqCst);
                Ok(item)
            },
        )
        .unwrap();

    assert_eq!(report.succeeded, 20);
    assert!(max_lead.load(Ordering::SeqCst) <= 1 + 2);
}

#[test]
fn test_concurrent_failures_report_one() {
    let supervisor = Supervisor::new(SupervisorConfig::new(4, 4)).unwrap();
    let report = supervisor
        .run(
            |producer: &Producer<u32>| producer.put_all(0..100),
            |_: u32| -> Result<u32> {
                thread::sleep(Duration::from_millis(5));
                Err(WorkError::other("always fails"))
            },
        )
        .unwrap();

    assert!(report.failure.is_some());
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed as usize, 1 + report.secondary_failures.len());
    assert!(report.failed <= 4);
    assert!(accounted(&report));
}

#[test]
fn test_handler_panic_is_first_failure() {
    let supervisor = Supervisor::new(SupervisorConfig::new(3, 2)).unwrap();
    let report = supervisor
        .run(
            |producer: &Producer<u32>| producer.put_all(1..=6),
            |item: u32| -> Result<u32> {
                if item == 2 {
                    panic!("handler exploded");
                }
                Ok(item)
            },
        )
        .unwrap();

    let failure = report.failure.as_ref().expect("panic must fail the run");
    assert_eq!(failure.sequence(), Some(2));
    assert!(matches!(failure.root_cause(), WorkError::WorkerPanic { .. }));
    assert!(accounted(&report));
}

#[test]
fn test_mid_item_cancel_lets_item_finish() {
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let started_clone = Arc::clone(&started);
    let finished_clone = Arc::clone(&finished);

    let supervisor = Arc::new(Supervisor::new(SupervisorConfig::new(4, 1)).unwrap());
    let canceller = {
        let supervisor = Arc::clone(&supervisor);
        let started = Arc::clone(&started);
        thread::spawn(move || {
            while !started.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            supervisor.cancel();
        })
    };

    let report = supervisor
        .run(
            |producer: &Producer<u32>| producer.put_all(1..=4),
            move |item: u32| -> Result<u32> {
                started_clone.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                finished_clone.store(true, Ordering::SeqCst);
                Ok(item)
            },
        )
        .unwrap();
    canceller.join().unwrap();

    assert!(finished.load(Ordering::SeqCst));
    assert!(matches!(report.failure, Some(WorkError::Cancelled { .. })));
    assert_eq!(report.succeeded, 1);
    assert!(accounted(&report));
    assert!(report
        .worker_states
        .iter()
        .all(|s| *s == WorkerState::Cancelled));
}

#[test]
fn test_deadline_stops_slow_run() {
    let config = SupervisorConfig::new(2, 2).with_deadline(Duration::from_millis(100));
    let supervisor = Supervisor::new(config).unwrap();

    let start = Instant::now();
    let report = supervisor
        .run(
            |producer: &Producer<u32>| producer.put_all(0..10_000),
            |item: u32| -> Result<u32> {
                thread::sleep(Duration::from_millis(10));
                Ok(item)
            },
        )
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(matches!(
        report.failure,
        Some(WorkError::DeadlineExceeded { timeout_ms: 100 })
    ));
    assert!(report.succeeded > 0);
    assert!(report.produced < 10_000);
    assert!(accounted(&report));
}

#[test]
fn test_deadline_not_reached() {
    let config = SupervisorConfig::new(2, 2).with_deadline(Duration::from_secs(10));
    let supervisor = Supervisor::new(config).unwrap();
    let report = supervisor
        .run(
            |producer: &Producer<u32>| producer.put_all(0..10),
            |item: u32| -> Result<u32> { Ok(item) },
        )
        .unwrap();
    assert!(report.is_success());
    assert!(!supervisor.token().is_cancelled());
}

#[test]
fn test_boxed_tasks_through_supervisor() {
    let supervisor = Supervisor::new(SupervisorConfig::new(2, 2)).unwrap();
    let report = supervisor
        .run(
            |producer: &Producer<BoxedTask<u64>>| {
                for i in 0..6u64 {
                    producer.put(ClosureTask::with_name(move || Ok(i * i), "square").boxed())?;
                }
                Ok(())
            },
            TaskRunner,
        )
        .unwrap();

    assert_eq!(report.into_result().unwrap(), vec![0, 1, 4, 9, 16, 25]);
}

#[test]
fn test_summary_serializes() {
    let supervisor = Supervisor::new(SupervisorConfig::new(2, 1)).unwrap();
    let report = supervisor
        .run(
            |producer: &Producer<u32>| producer.put_all(1..=3),
            |item: u32| -> Result<u32> {
                if item == 2 {
                    Err(WorkError::other("two"))
                } else {
                    Ok(item)
                }
            },
        )
        .unwrap();

    let json = report.summary().to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["failed_sequence"], 2);
    assert_eq!(value["produced"], report.produced);
}
