//! # In-Memory Broker
//!
//! Thread-safe in-memory broker for testing and local development.
//!
//! ## Features
//!
//! - **Receive-and-delete**: messages leave the entity when the processor fetches them
//! - **Bounded concurrency**: handler invocations are limited by a semaphore sized from
//!   `max_concurrent_calls`; up to `prefetch_count` messages are fetched ahead
//! - **Fault injection**: unreachable entities, failing starts, transient receive faults and
//!   rejected receives that stop the receive loop
//! - **Entity paths are opaque**: `orders`, `orders/$DeadLetterQueue` and
//!   `events/Subscriptions/audit` are simply distinct entities

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::messaging::traits::{BrokerClient, MessageHandler, Processor};
use crate::messaging::types::{
    BrokerMessage, ErrorSource, ProcessErrorContext, ProcessMessageContext, ProcessorOptions,
};
use crate::messaging::{MessagingError, MessagingResult};

/// In-memory entity with message storage
#[derive(Debug, Default)]
struct InMemoryEntity {
    /// Messages in the entity (FIFO order)
    messages: Mutex<VecDeque<BrokerMessage>>,
    /// Signalled whenever a message is sent
    message_ready: Notify,
    /// Remaining receive attempts that should fail
    pending_receive_faults: AtomicU32,
    /// Error returned by every receive, ending the receive loop
    receive_rejection: Mutex<Option<MessagingError>>,
    /// Total messages sent to this entity
    total_sent: AtomicU64,
    /// Total messages received (and therefore deleted) from this entity
    total_received: AtomicU64,
}

impl InMemoryEntity {
    fn push(&self, message: BrokerMessage) {
        self.messages.lock().push_back(message);
        self.total_sent.fetch_add(1, Ordering::Relaxed);
        self.message_ready.notify_one();
    }

    fn take(&self, max_messages: usize) -> Vec<BrokerMessage> {
        let mut messages = self.messages.lock();
        let count = max_messages.min(messages.len());
        let taken: Vec<BrokerMessage> = messages.drain(..count).collect();
        self.total_received
            .fetch_add(taken.len() as u64, Ordering::Relaxed);
        taken
    }

    /// Put prefetched-but-undispatched messages back at the head of the entity
    fn requeue_front(&self, returned: VecDeque<BrokerMessage>) {
        if returned.is_empty() {
            return;
        }
        let count = returned.len() as u64;
        let mut messages = self.messages.lock();
        for message in returned.into_iter().rev() {
            messages.push_front(message);
        }
        self.total_received.fetch_sub(count, Ordering::Relaxed);
    }

    fn take_receive_fault(&self) -> bool {
        self.pending_receive_faults
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    entities: DashMap<String, Arc<InMemoryEntity>>,
    unreachable: DashSet<String>,
    failing_starts: DashSet<String>,
    processors_created: AtomicU64,
    open_processors: AtomicI64,
}

impl BrokerState {
    fn entity(&self, entity_path: &str) -> Arc<InMemoryEntity> {
        self.entities
            .entry(entity_path.to_string())
            .or_default()
            .value()
            .clone()
    }
}

/// In-memory broker
///
/// Cloning is cheap; clones share the same entities.
///
/// # Example
///
/// ```rust
/// use servicebus_drain::messaging::providers::InMemoryBroker;
/// use servicebus_drain::messaging::BrokerMessage;
///
/// let broker = InMemoryBroker::new();
/// broker.send("orders", BrokerMessage::new("hello"));
/// broker.send_batch("orders/$DeadLetterQueue", 3);
///
/// assert_eq!(broker.message_count("orders"), 1);
/// assert_eq!(broker.message_count("orders/$DeadLetterQueue"), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a message to an entity, creating the entity if needed
    pub fn send(&self, entity_path: &str, message: BrokerMessage) {
        self.state.entity(entity_path).push(message);
    }

    /// Send `count` small numbered messages to an entity
    pub fn send_batch(&self, entity_path: &str, count: usize) {
        let entity = self.state.entity(entity_path);
        for index in 0..count {
            entity.push(
                BrokerMessage::new(format!("message-{index}"))
                    .with_correlation_id(format!("{entity_path}-{index}")),
            );
        }
    }

    /// Number of messages currently stored in an entity
    pub fn message_count(&self, entity_path: &str) -> usize {
        self.state
            .entities
            .get(entity_path)
            .map(|entity| entity.messages.lock().len())
            .unwrap_or(0)
    }

    /// Total messages ever received from an entity
    pub fn total_received(&self, entity_path: &str) -> u64 {
        self.state
            .entities
            .get(entity_path)
            .map(|entity| entity.total_received.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Make the next `count` receive attempts on an entity fail
    pub fn inject_receive_faults(&self, entity_path: &str, count: u32) {
        self.state
            .entity(entity_path)
            .pending_receive_faults
            .fetch_add(count, Ordering::AcqRel);
    }

    /// Make every receive on an entity fail with `error`, as a broker rejecting the credential
    /// or not knowing the entity would
    pub fn reject_receives(&self, entity_path: &str, error: MessagingError) {
        *self.state.entity(entity_path).receive_rejection.lock() = Some(error);
    }

    /// Make processor creation for an entity fail with a connection error
    pub fn mark_unreachable(&self, entity_path: &str) {
        self.state.unreachable.insert(entity_path.to_string());
    }

    /// Make `start_processing` for an entity fail with a connection error
    pub fn fail_start(&self, entity_path: &str) {
        self.state.failing_starts.insert(entity_path.to_string());
    }

    /// Number of processors created so far
    pub fn processors_created(&self) -> u64 {
        self.state.processors_created.load(Ordering::Relaxed)
    }

    /// Number of processors created but not yet closed
    pub fn open_processors(&self) -> i64 {
        self.state.open_processors.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn create_processor(
        &self,
        entity_path: &str,
        options: ProcessorOptions,
    ) -> MessagingResult<Box<dyn Processor>> {
        if self.state.unreachable.contains(entity_path) {
            return Err(MessagingError::connection(
                entity_path,
                "in-memory entity marked unreachable",
            ));
        }

        let identifier = format!("{entity_path}-{}", Uuid::new_v4());
        self.state.processors_created.fetch_add(1, Ordering::Relaxed);
        self.state.open_processors.fetch_add(1, Ordering::Relaxed);

        debug!(
            entity_path = %entity_path,
            processor = %identifier,
            max_concurrent_calls = options.max_concurrent_calls,
            prefetch_count = options.prefetch_count,
            "📋 IN_MEMORY: Processor created"
        );

        Ok(Box::new(InMemoryProcessor {
            identifier,
            entity_path: entity_path.to_string(),
            entity: self.state.entity(entity_path),
            state: self.state.clone(),
            options,
            handler: None,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            receive_loop: None,
            processing: Arc::new(AtomicBool::new(false)),
            closed: false,
        }))
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

/// Processor over one in-memory entity
pub struct InMemoryProcessor {
    identifier: String,
    entity_path: String,
    entity: Arc<InMemoryEntity>,
    state: Arc<BrokerState>,
    options: ProcessorOptions,
    handler: Option<Arc<dyn MessageHandler>>,
    shutdown: CancellationToken,
    /// In-flight handler invocations
    tracker: TaskTracker,
    receive_loop: Option<JoinHandle<()>>,
    processing: Arc<AtomicBool>,
    closed: bool,
}

#[async_trait]
impl Processor for InMemoryProcessor {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    fn register_handler(&mut self, handler: Arc<dyn MessageHandler>) {
        self.handler = Some(handler);
    }

    async fn start_processing(&mut self) -> MessagingResult<()> {
        if self.closed {
            return Err(MessagingError::invalid_state("processor is closed"));
        }
        if self.receive_loop.is_some() {
            return Err(MessagingError::invalid_state("processor is already running"));
        }
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| MessagingError::invalid_state("no message handler registered"))?;

        if self.state.failing_starts.contains(&self.entity_path) {
            return Err(MessagingError::connection(
                &self.entity_path,
                "in-memory entity refused to start",
            ));
        }

        let receive_loop = ReceiveLoop {
            entity: self.entity.clone(),
            handler,
            concurrency: Arc::new(Semaphore::new(self.options.max_concurrent_calls.max(1) as usize)),
            batch_size: self.options.prefetch_count.max(1) as usize,
            shutdown: self.shutdown.clone(),
            tracker: self.tracker.clone(),
            entity_path: self.entity_path.clone(),
            identifier: self.identifier.clone(),
        };

        self.processing.store(true, Ordering::Release);
        self.receive_loop = Some(tokio::spawn(receive_loop.run()));

        info!(
            entity_path = %self.entity_path,
            processor = %self.identifier,
            "🚀 IN_MEMORY: Processing started"
        );
        Ok(())
    }

    async fn stop_processing(&mut self) -> MessagingResult<()> {
        self.shutdown.cancel();

        if let Some(handle) = self.receive_loop.take() {
            handle
                .await
                .map_err(|e| MessagingError::internal(format!("receive loop failed: {e}")))?;
        }

        self.tracker.close();
        self.tracker.wait().await;
        self.processing.store(false, Ordering::Release);

        debug!(
            entity_path = %self.entity_path,
            processor = %self.identifier,
            "🛑 IN_MEMORY: Processing stopped"
        );
        Ok(())
    }

    async fn close(&mut self) -> MessagingResult<()> {
        if self.closed {
            return Ok(());
        }
        let stopped = self.stop_processing().await;
        self.closed = true;
        self.state.open_processors.fetch_sub(1, Ordering::Relaxed);
        stopped
    }

    fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }
}

impl Drop for InMemoryProcessor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct ReceiveLoop {
    entity: Arc<InMemoryEntity>,
    handler: Arc<dyn MessageHandler>,
    concurrency: Arc<Semaphore>,
    batch_size: usize,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    entity_path: String,
    identifier: String,
}

impl ReceiveLoop {
    async fn run(self) {
        let mut buffer: VecDeque<BrokerMessage> = VecDeque::new();

        loop {
            if buffer.is_empty() {
                let rejection = self.entity.receive_rejection.lock().clone();
                if let Some(error) = rejection {
                    warn!(
                        entity_path = %self.entity_path,
                        processor = %self.identifier,
                        error = %error,
                        "❌ IN_MEMORY: Receive rejected, stopping receive loop"
                    );
                    self.report(error);
                    break;
                }

                if self.entity.take_receive_fault() {
                    warn!(
                        entity_path = %self.entity_path,
                        processor = %self.identifier,
                        "⚠️ IN_MEMORY: Injected receive fault"
                    );
                    self.report(MessagingError::receive(
                        &self.entity_path,
                        "injected receive fault",
                    ));
                    tokio::task::yield_now().await;
                    continue;
                }

                buffer.extend(self.entity.take(self.batch_size));
                if buffer.is_empty() {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = self.entity.message_ready.notified() => continue,
                    }
                }
            }

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.concurrency.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some(message) = buffer.pop_front() else {
                continue;
            };

            let handler = self.handler.clone();
            let context = ProcessMessageContext {
                message,
                entity_path: self.entity_path.clone(),
                identifier: self.identifier.clone(),
            };
            self.tracker.spawn(async move {
                let _permit = permit;
                dispatch(handler, context).await;
            });
        }

        self.entity.requeue_front(buffer);
    }

    fn report(&self, error: MessagingError) {
        let handler = self.handler.clone();
        let context = ProcessErrorContext {
            error,
            error_source: ErrorSource::Receive,
            entity_path: self.entity_path.clone(),
            identifier: self.identifier.clone(),
        };
        self.tracker.spawn(async move {
            handler.process_error(context).await;
        });
    }
}

async fn dispatch(handler: Arc<dyn MessageHandler>, context: ProcessMessageContext) {
    let entity_path = context.entity_path.clone();
    let identifier = context.identifier.clone();

    if let Err(error) = handler.process_message(context).await {
        handler
            .process_error(ProcessErrorContext {
                error,
                error_source: ErrorSource::UserCallback,
                entity_path,
                identifier,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingHandler {
        received: AtomicU64,
        errors: Mutex<Vec<ErrorSource>>,
        fail_correlation_id: Option<String>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn process_message(&self, context: ProcessMessageContext) -> MessagingResult<()> {
            if context.message.correlation_id == self.fail_correlation_id {
                return Err(MessagingError::handler(&context.entity_path, "boom"));
            }
            self.received.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn process_error(&self, context: ProcessErrorContext) {
            self.errors.lock().push(context.error_source);
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_send_and_count() {
        let broker = InMemoryBroker::new();
        broker.send_batch("orders", 4);
        broker.send("orders", BrokerMessage::new("five"));

        assert_eq!(broker.message_count("orders"), 5);
        assert_eq!(broker.message_count("missing"), 0);
    }

    #[tokio::test]
    async fn test_processor_receives_and_deletes() {
        let broker = InMemoryBroker::new();
        broker.send_batch("orders", 25);

        let handler = Arc::new(RecordingHandler::default());
        let mut processor = broker
            .create_processor(
                "orders",
                ProcessorOptions {
                    max_concurrent_calls: 4,
                    prefetch_count: 10,
                    ..ProcessorOptions::default()
                },
            )
            .await
            .unwrap();
        processor.register_handler(handler.clone());
        processor.start_processing().await.unwrap();
        assert!(processor.is_processing());

        let observed = handler.clone();
        wait_until(move || observed.received.load(Ordering::SeqCst) == 25).await;

        processor.close().await.unwrap();
        assert!(!processor.is_processing());
        assert_eq!(broker.message_count("orders"), 0);
        assert_eq!(broker.total_received("orders"), 25);
        assert_eq!(broker.open_processors(), 0);
    }

    #[tokio::test]
    async fn test_handler_errors_routed_to_error_callback() {
        let broker = InMemoryBroker::new();
        broker.send_batch("orders", 3);

        let handler = Arc::new(RecordingHandler {
            fail_correlation_id: Some("orders-1".to_string()),
            ..RecordingHandler::default()
        });
        let mut processor = broker
            .create_processor("orders", ProcessorOptions::default())
            .await
            .unwrap();
        processor.register_handler(handler.clone());
        processor.start_processing().await.unwrap();

        let observed = handler.clone();
        wait_until(move || observed.received.load(Ordering::SeqCst) == 2).await;
        processor.close().await.unwrap();

        assert_eq!(*handler.errors.lock(), vec![ErrorSource::UserCallback]);
    }

    #[tokio::test]
    async fn test_injected_receive_faults() {
        let broker = InMemoryBroker::new();
        broker.inject_receive_faults("orders", 2);
        broker.send_batch("orders", 2);

        let handler = Arc::new(RecordingHandler::default());
        let mut processor = broker
            .create_processor("orders", ProcessorOptions::default())
            .await
            .unwrap();
        processor.register_handler(handler.clone());
        processor.start_processing().await.unwrap();

        let observed = handler.clone();
        wait_until(move || observed.received.load(Ordering::SeqCst) == 2).await;
        processor.close().await.unwrap();

        assert_eq!(handler.errors.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_receives_stop_the_loop() {
        let broker = InMemoryBroker::new();
        broker.send_batch("orders", 2);
        broker.reject_receives("orders", MessagingError::entity_not_found("orders"));

        let handler = Arc::new(RecordingHandler::default());
        let mut processor = broker
            .create_processor("orders", ProcessorOptions::default())
            .await
            .unwrap();
        processor.register_handler(handler.clone());
        processor.start_processing().await.unwrap();

        let observed = handler.clone();
        wait_until(move || !observed.errors.lock().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        processor.close().await.unwrap();

        assert_eq!(*handler.errors.lock(), vec![ErrorSource::Receive]);
        assert_eq!(handler.received.load(Ordering::SeqCst), 0);
        assert_eq!(broker.message_count("orders"), 2);
    }

    #[tokio::test]
    async fn test_start_requires_handler() {
        let broker = InMemoryBroker::new();
        let mut processor = broker
            .create_processor("orders", ProcessorOptions::default())
            .await
            .unwrap();

        let err = processor.start_processing().await.unwrap_err();
        assert!(matches!(err, MessagingError::InvalidState { .. }));
        processor.close().await.unwrap();
        processor.close().await.unwrap();
        assert_eq!(broker.open_processors(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_entity() {
        let broker = InMemoryBroker::new();
        broker.mark_unreachable("orders");

        let result = broker
            .create_processor("orders", ProcessorOptions::default())
            .await;
        assert!(matches!(result, Err(MessagingError::Connection { .. })));
        assert_eq!(broker.processors_created(), 0);
    }

    #[tokio::test]
    async fn test_stop_returns_prefetched_messages() {
        let broker = InMemoryBroker::new();

        // A handler that never finishes keeps the single permit busy
        struct StuckHandler;

        #[async_trait]
        impl MessageHandler for StuckHandler {
            async fn process_message(&self, _context: ProcessMessageContext) -> MessagingResult<()> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }

            async fn process_error(&self, _context: ProcessErrorContext) {}
        }

        broker.send_batch("orders", 10);
        let mut processor = broker
            .create_processor(
                "orders",
                ProcessorOptions {
                    max_concurrent_calls: 1,
                    prefetch_count: 10,
                    ..ProcessorOptions::default()
                },
            )
            .await
            .unwrap();
        processor.register_handler(Arc::new(StuckHandler));
        processor.start_processing().await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        processor.close().await.unwrap();

        // One message was dispatched; the rest of the prefetched batch went back
        assert_eq!(broker.message_count("orders"), 9);
        assert_eq!(broker.total_received("orders"), 1);
    }
}
