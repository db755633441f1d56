//! # Broker Client Traits
//!
//! Provider-agnostic seams between the drain core and a message broker. A [`BrokerClient`]
//! creates [`Processor`]s; a processor receives messages from one entity and dispatches them to
//! a registered [`MessageHandler`], reporting failures through the same handler's error callback.
//!
//! Implementations must be safe to drive from any tokio worker thread.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::{ProcessErrorContext, ProcessMessageContext, ProcessorOptions};
use super::MessagingResult;

/// Callbacks invoked by a processor
///
/// `process_message` may be invoked concurrently, up to the processor's
/// `max_concurrent_calls`. An `Err` returned from it is routed to `process_error` with
/// [`ErrorSource::UserCallback`](super::ErrorSource::UserCallback); the processor keeps going.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn process_message(&self, context: ProcessMessageContext) -> MessagingResult<()>;

    async fn process_error(&self, context: ProcessErrorContext);
}

/// A running receive loop bound to one entity path
#[async_trait]
pub trait Processor: Send + Sync {
    /// Stable identifier of this processor instance
    fn identifier(&self) -> &str;

    /// Entity path this processor receives from
    fn entity_path(&self) -> &str;

    /// Register the message and error callbacks; must happen before `start_processing`
    fn register_handler(&mut self, handler: Arc<dyn MessageHandler>);

    /// Begin receiving and dispatching messages
    async fn start_processing(&mut self) -> MessagingResult<()>;

    /// Stop accepting new receives and wait for in-flight handlers to finish
    async fn stop_processing(&mut self) -> MessagingResult<()>;

    /// Release broker resources. Idempotent.
    async fn close(&mut self) -> MessagingResult<()>;

    fn is_processing(&self) -> bool;
}

/// Factory for processors
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    async fn create_processor(
        &self,
        entity_path: &str,
        options: ProcessorOptions,
    ) -> MessagingResult<Box<dyn Processor>>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}
