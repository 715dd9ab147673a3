//! Sensor readings over broker streams
//!
//! Two writers append readings to their own stream. One supervised run reads
//! both streams through consumer groups and acknowledges every reading once a
//! worker has handled it.
//!
//! Run with: RUST_LOG=debug cargo run --example broker_stream

use rand::Rng;
use rust_work_queue::broker::{BrokerStream, MemoryBroker, StreamEntry};
use rust_work_queue::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const READINGS: usize = 10;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Broker Streams ===\n");

    let broker = Arc::new(MemoryBroker::new());
    let streams = [
        BrokerStream::new(Arc::clone(&broker), "dhaka", "demo_consumer"),
        BrokerStream::new(Arc::clone(&broker), "chittagong", "another"),
    ];
    for stream in &streams {
        stream.ensure_group()?;
    }

    let writers: Vec<_> = streams
        .iter()
        .cloned()
        .map(|stream| {
            thread::spawn(move || -> Result<()> {
                let mut rng = rand::thread_rng();
                for _ in 0..READINGS {
                    let id = stream.append([
                        ("uuid", uuid::Uuid::new_v4().to_string()),
                        ("temperature", rng.gen_range(0..=100).to_string()),
                        ("humidity", rng.gen_range(0..=100).to_string()),
                    ])?;
                    println!("{} <- {}", stream.stream(), id);
                    thread::sleep(Duration::from_millis(20));
                }
                Ok(())
            })
        })
        .collect();

    let readers = streams.clone();
    let ackers = streams.clone();
    let supervisor = Supervisor::new(SupervisorConfig::new(4, 2))?;
    let report = supervisor.run_with_broker(
        Arc::clone(&broker),
        move |producer: &Producer<(usize, StreamEntry)>, _: &Arc<MemoryBroker>| {
            let mut read = 0;
            while read < readers.len() * READINGS {
                for (index, stream) in readers.iter().enumerate() {
                    for entry in stream.read("reader", 5, Some(Duration::from_millis(50)))? {
                        read += 1;
                        producer.put((index, entry))?;
                    }
                }
            }
            Ok(())
        },
        move |(index, entry): (usize, StreamEntry), _: &Arc<MemoryBroker>| -> Result<String> {
            let stream = &ackers[index];
            stream.ack(entry.id)?;
            Ok(format!(
                "{} {}: temperature {} humidity {}",
                stream.stream(),
                entry.id,
                entry.field("temperature").unwrap_or("?"),
                entry.field("humidity").unwrap_or("?"),
            ))
        },
    )?;

    for writer in writers {
        if let Ok(Err(e)) = writer.join() {
            println!("writer failed: {}", e);
        }
    }

    for line in report.values() {
        println!("  {}", line);
    }
    for stream in &streams {
        println!(
            "{}: {} entries, {} pending",
            stream.stream(),
            stream.length()?,
            stream.pending_count()?
        );
    }

    Ok(())
}
