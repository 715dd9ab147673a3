//! Deadlines and timeouts
//!
//! Shows a one-shot timer guarding a single blocking operation, and a
//! supervised run that is cut short by its deadline.
//!
//! Run with: cargo run --example deadline

use rust_work_queue::prelude::*;
use rust_work_queue::run_with_timeout;
use std::thread;
use std::time::Duration;

fn slow_sum(token: &CancellationToken, steps: u64) -> Result<u64> {
    let mut total = 0;
    for i in 0..steps {
        token.check()?;
        thread::sleep(Duration::from_millis(10));
        total += i;
    }
    Ok(total)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Deadlines ===\n");

    println!("1. Fast enough:");
    let total = run_with_timeout(Duration::from_secs(1), |token| slow_sum(token, 5))?;
    println!("   sum = {}", total);

    println!("\n2. Too slow:");
    match run_with_timeout(Duration::from_millis(100), |token| slow_sum(token, 100)) {
        Ok(total) => println!("   sum = {}", total),
        Err(e) => println!("   {}", e),
    }

    println!("\n3. A timer cannot be re-armed once it fired:");
    let timer = DeadlineTimer::new(CancellationToken::new());
    timer.arm(Duration::from_millis(10)).map_err(WorkError::from)?;
    thread::sleep(Duration::from_millis(50));
    match timer.arm(Duration::from_secs(1)) {
        Ok(()) => println!("   re-armed"),
        Err(e) => println!("   {}", e),
    }

    println!("\n4. Supervised run with a deadline:");
    let config = SupervisorConfig::new(4, 2).with_deadline(Duration::from_millis(200));
    let report = Supervisor::new(config)?.run(
        |producer: &Producer<u64>| producer.put_all(0..1_000),
        |item: u64| -> Result<u64> {
            thread::sleep(Duration::from_millis(25));
            Ok(item)
        },
    )?;
    println!(
        "   {} succeeded, {} abandoned before the deadline",
        report.succeeded, report.abandoned
    );
    if let Some(failure) = &report.failure {
        println!("   {}", failure);
    }
    Ok(())
}
