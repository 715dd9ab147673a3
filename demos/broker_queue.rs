//! Broker-backed task queue
//!
//! Tasks are serialized into a broker list, pulled into a bounded local
//! queue by the producer and executed by workers that store every result
//! under `result:{id}`.
//!
//! Run with: RUST_LOG=debug cargo run --example broker_queue

use rand::Rng;
use rust_work_queue::broker::{BrokerQueue, MemoryBroker, TaskEnvelope};
use rust_work_queue::prelude::*;
use std::sync::Arc;

const QUEUE: &str = "default";

fn execute(task: &TaskEnvelope) -> Result<i64> {
    match task.kind.as_str() {
        "random_between" => {
            let (low, high): (i64, i64) = task.args()?;
            Ok(rand::thread_rng().gen_range(low..=high))
        }
        other => Err(WorkError::other(format!("unknown task kind '{}'", other))),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Broker Queue ===\n");

    let broker = Arc::new(MemoryBroker::new());
    let tasks = BrokerQueue::new(Arc::clone(&broker), QUEUE);
    let mut ids = Vec::new();
    for (low, high) in (0..10).zip(100..110) {
        ids.push(tasks.enqueue("random_between", (low, high))?);
    }
    println!("enqueued {} tasks", tasks.length()?);

    let supervisor = Supervisor::new(SupervisorConfig::new(4, 3))?;
    let report = supervisor.run_with_broker(
        Arc::clone(&broker),
        |producer: &Producer<TaskEnvelope>, broker: &Arc<MemoryBroker>| {
            let tasks = BrokerQueue::new(Arc::clone(broker), QUEUE);
            for _ in 0..tasks.length()? {
                producer.put(tasks.dequeue()?)?;
            }
            Ok(())
        },
        |task: TaskEnvelope, broker: &Arc<MemoryBroker>| -> Result<i64> {
            let value = execute(&task)?;
            BrokerQueue::new(Arc::clone(broker), QUEUE).store_result(&task.id, &value)?;
            Ok(value)
        },
    )?;

    println!("{} tasks processed\n", report.succeeded);
    for id in &ids {
        let key = format!("result:{}", id);
        if let Some(raw) = broker.result(&key) {
            println!("  {} = {}", key, String::from_utf8_lossy(&raw));
        }
    }
    Ok(())
}
