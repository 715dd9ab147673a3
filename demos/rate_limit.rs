//! Request limiting
//!
//! A keyed rate limiter rejects callers once their per-window budget is
//! spent, and a concurrency limit caps how many calls run at the same time.
//!
//! Run with: cargo run --example rate_limit

use rust_work_queue::limit::{run_limited, ConcurrencyLimit};
use rust_work_queue::rate_limit::{RateLimitConfig, RateLimiter};
use rust_work_queue::{Result, WorkError};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Rate Limit ===\n");

    let limiter = RateLimiter::new(RateLimitConfig::new(5).with_ttl(Duration::from_secs(2)))?;
    let mut headers = HashMap::new();
    headers.insert("Authorization".to_string(), "helloworld".to_string());

    for call in 0..15 {
        match limiter.check(&headers) {
            Ok(()) => println!("  call {} admitted", call),
            Err(WorkError::TooManyRequests { key }) => {
                println!("  call {} rejected (429 for {})", call, key);
            }
            Err(e) => return Err(e),
        }
    }

    println!("\n=== Concurrency Limit ===\n");

    let limit = ConcurrencyLimit::new(3)?;
    let echoed = run_limited(&limit, 0..9, |i| {
        println!(
            "  {} echoing {} ({} permits left)",
            thread::current().name().unwrap_or("?"),
            i,
            limit.available()
        );
        thread::sleep(Duration::from_millis(100));
        i
    })?;
    println!("\nechoed in order: {:?}", echoed);
    Ok(())
}
