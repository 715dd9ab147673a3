//! First-failure cancellation
//!
//! One consumer works through five items and fails on the third. The
//! supervisor cancels, discards what is still buffered and reports the
//! failure together with the abandoned count.
//!
//! Run with: cargo run --example first_failure

use rust_work_queue::prelude::*;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== First Failure ===\n");

    let supervisor = Supervisor::new(SupervisorConfig::new(5, 1))?;
    let report = supervisor.run(
        |producer: &Producer<&'static str>| {
            producer.put_all(["alpha", "beta", "gamma", "delta", "epsilon"])
        },
        |name: &'static str| -> Result<usize> {
            thread::sleep(Duration::from_millis(20));
            if name == "gamma" {
                return Err(WorkError::other(format!("refusing to process {}", name)));
            }
            println!("  processed {}", name);
            Ok(name.len())
        },
    )?;

    println!();
    println!("  succeeded: {}", report.succeeded);
    println!("  failed:    {}", report.failed);
    println!("  abandoned: {}", report.abandoned);

    match report.into_result() {
        Ok(_) => println!("\nunexpected success"),
        Err(e) => println!("\nrun failed: {}", e),
    }
    Ok(())
}
