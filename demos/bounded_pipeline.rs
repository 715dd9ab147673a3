//! Bounded producer/consumer pipeline
//!
//! A fast producer feeds a queue of three slots that two slower consumers
//! drain. The producer is throttled by the queue, and every item is handled
//! exactly once.
//!
//! Run with: RUST_LOG=debug cargo run --example bounded_pipeline

use rust_work_queue::prelude::*;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Bounded Pipeline ===\n");

    let config = SupervisorConfig::new(3, 2).with_thread_name_prefix("consumer");
    let supervisor = Supervisor::new(config)?;

    let report = supervisor.run(
        |producer: &Producer<u32>| {
            for i in 1..=10 {
                let sequence = producer.put(i)?;
                println!("  produced item {} (#{})", i, sequence);
            }
            Ok(())
        },
        |item: u32| -> Result<u32> {
            println!(
                "  {} consuming {}",
                thread::current().name().unwrap_or("?"),
                item
            );
            thread::sleep(Duration::from_millis(50));
            Ok(item * item)
        },
    )?;

    println!("\nSquares in production order:");
    for (sequence, square) in &report.outputs {
        println!("  #{:>2} -> {}", sequence, square);
    }

    println!("\nSummary: {}", report.summary().to_json()?);
    Ok(())
}
