//! Receive-and-discard handler registered on every drain processor

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use super::counter::ProcessingCounter;
use crate::messaging::{
    ErrorSource, MessageHandler, MessagingError, MessagingResult, ProcessErrorContext,
    ProcessMessageContext,
};

/// Counts each received message and drops it
///
/// Messages are removed by the broker at receipt, so discarding is just not looking at the body.
/// Transient receive errors are counted and ignored. The first non-transient error from the
/// broker side (a rejected credential, a missing entity) is kept so the worker can fail the
/// drain instead of mistaking silence for an empty entity.
#[derive(Debug)]
pub struct DrainMessageHandler {
    counter: Arc<ProcessingCounter>,
    faults: AtomicU64,
    fatal: Mutex<Option<MessagingError>>,
    fatal_signal: Notify,
}

impl DrainMessageHandler {
    pub fn new(counter: Arc<ProcessingCounter>) -> Self {
        Self {
            counter,
            faults: AtomicU64::new(0),
            fatal: Mutex::new(None),
            fatal_signal: Notify::new(),
        }
    }

    /// Errors reported through `process_error` so far
    pub fn fault_count(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// First non-transient broker error, if any
    pub fn fatal_error(&self) -> Option<MessagingError> {
        self.fatal.lock().clone()
    }

    /// Resolves with the first non-transient broker error
    pub async fn failed(&self) -> MessagingError {
        loop {
            if let Some(error) = self.fatal_error() {
                return error;
            }
            self.fatal_signal.notified().await;
        }
    }

    fn is_fatal(context: &ProcessErrorContext) -> bool {
        context.error_source != ErrorSource::UserCallback && !context.error.is_transient()
    }
}

#[async_trait]
impl MessageHandler for DrainMessageHandler {
    async fn process_message(&self, context: ProcessMessageContext) -> MessagingResult<()> {
        let count = self.counter.increment(&context.identifier);

        debug!(
            entity_path = %context.entity_path,
            processor = %context.identifier,
            message_id = %context.message.message_id,
            correlation_id = context.message.correlation_id.as_deref(),
            count = count,
            "🗑️ DRAIN: Message discarded"
        );
        Ok(())
    }

    async fn process_error(&self, context: ProcessErrorContext) {
        self.faults.fetch_add(1, Ordering::Relaxed);

        if Self::is_fatal(&context) {
            error!(
                entity_path = %context.entity_path,
                processor = %context.identifier,
                error_source = %context.error_source,
                error = %context.error,
                "❌ DRAIN: Processor reported a non-transient error"
            );
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(context.error);
                drop(fatal);
                self.fatal_signal.notify_one();
            }
            return;
        }

        warn!(
            entity_path = %context.entity_path,
            processor = %context.identifier,
            error_source = %context.error_source,
            error = %context.error,
            "⚠️ DRAIN: Processor reported an error, continuing"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{BrokerMessage, ErrorSource, MessagingError};

    fn message_context(identifier: &str) -> ProcessMessageContext {
        ProcessMessageContext {
            message: BrokerMessage::new(b"payload".to_vec()).with_correlation_id("c-1"),
            entity_path: "orders".to_string(),
            identifier: identifier.to_string(),
        }
    }

    #[tokio::test]
    async fn test_messages_are_counted_per_processor() {
        let counter = Arc::new(ProcessingCounter::new());
        let handler = DrainMessageHandler::new(counter.clone());

        handler.process_message(message_context("orders-1")).await.unwrap();
        handler.process_message(message_context("orders-1")).await.unwrap();
        handler.process_message(message_context("orders-2")).await.unwrap();

        assert_eq!(counter.get("orders-1"), 2);
        assert_eq!(counter.get("orders-2"), 1);
    }

    #[tokio::test]
    async fn test_errors_do_not_touch_the_counter() {
        let counter = Arc::new(ProcessingCounter::new());
        let handler = DrainMessageHandler::new(counter.clone());

        handler
            .process_error(ProcessErrorContext {
                error: MessagingError::receive("orders", "broker busy"),
                error_source: ErrorSource::Receive,
                entity_path: "orders".to_string(),
                identifier: "orders-1".to_string(),
            })
            .await;

        assert_eq!(handler.fault_count(), 1);
        assert_eq!(counter.get("orders-1"), 0);
        assert!(handler.fatal_error().is_none());
    }

    fn error_context(error: MessagingError, error_source: ErrorSource) -> ProcessErrorContext {
        ProcessErrorContext {
            error,
            error_source,
            entity_path: "orders".to_string(),
            identifier: "orders-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_non_transient_error_is_kept() {
        let handler = DrainMessageHandler::new(Arc::new(ProcessingCounter::new()));

        handler
            .process_error(error_context(
                MessagingError::handler("orders", "callback failed"),
                ErrorSource::UserCallback,
            ))
            .await;
        assert!(handler.fatal_error().is_none());

        handler
            .process_error(error_context(
                MessagingError::authentication("401 Unauthorized"),
                ErrorSource::Receive,
            ))
            .await;
        handler
            .process_error(error_context(
                MessagingError::entity_not_found("orders"),
                ErrorSource::Receive,
            ))
            .await;

        assert_eq!(handler.fault_count(), 3);
        assert!(matches!(
            handler.failed().await,
            MessagingError::Authentication { .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_wakes_a_waiting_worker() {
        let handler = Arc::new(DrainMessageHandler::new(Arc::new(ProcessingCounter::new())));

        let waiter = tokio::spawn({
            let handler = handler.clone();
            async move { handler.failed().await }
        });
        tokio::task::yield_now().await;

        handler
            .process_error(error_context(
                MessagingError::entity_not_found("orders"),
                ErrorSource::Receive,
            ))
            .await;

        let error = waiter.await.unwrap();
        assert_eq!(error, MessagingError::entity_not_found("orders"));
    }
}
