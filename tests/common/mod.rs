//! Shared helpers for drain integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use servicebus_drain::config::DrainWorkerConfig;
use servicebus_drain::drain::DrainService;
use servicebus_drain::messaging::InMemoryBroker;
use tokio::task::JoinHandle;

pub const PERIOD: Duration = Duration::from_millis(1000);

pub fn worker_config() -> DrainWorkerConfig {
    DrainWorkerConfig::default()
        .with_polling_period(PERIOD)
        .with_concurrency(2, 10)
}

pub fn service(broker: &InMemoryBroker, config: DrainWorkerConfig) -> DrainService {
    DrainService::new(Arc::new(broker.clone()), config)
}

pub fn names(queues: &[&str]) -> Vec<String> {
    queues.iter().map(|name| name.to_string()).collect()
}

/// Sends `batches[i]` messages to `entity_path` at `offset + i * interval`
pub fn schedule_batches(
    broker: &InMemoryBroker,
    entity_path: &str,
    offset: Duration,
    interval: Duration,
    batches: Vec<usize>,
) -> JoinHandle<()> {
    let broker = broker.clone();
    let entity_path = entity_path.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(offset).await;
        for (index, count) in batches.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(interval).await;
            }
            broker.send_batch(&entity_path, count);
        }
    })
}

/// Sends one message to `entity_path` every `interval` until aborted
pub fn trickle(broker: &InMemoryBroker, entity_path: &str, interval: Duration) -> JoinHandle<()> {
    let broker = broker.clone();
    let entity_path = entity_path.to_string();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            broker.send_batch(&entity_path, 1);
        }
    })
}

pub fn assert_close(actual: Duration, expected: Duration) {
    let slack = Duration::from_millis(50);
    assert!(
        actual >= expected && actual <= expected + slack,
        "expected ~{expected:?}, got {actual:?}"
    );
}
