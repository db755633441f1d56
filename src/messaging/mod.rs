//! # Messaging Module
//!
//! Broker abstraction used by the drain workers. The [`BrokerClient`] trait hides the transport;
//! [`providers`] holds the Service Bus REST client and an in-memory broker for tests and local
//! runs.

pub mod errors;
pub mod providers;
pub mod traits;
pub mod types;

pub use errors::{MessagingError, MessagingResult};
pub use providers::{ConnectionString, InMemoryBroker, RestBrokerClient};
pub use traits::{BrokerClient, MessageHandler, Processor};
pub use types::{
    BrokerMessage, ErrorSource, ProcessErrorContext, ProcessMessageContext, ProcessorOptions,
    ReceiveMode,
};
