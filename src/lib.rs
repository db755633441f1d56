#![allow(clippy::doc_markdown)] // Allow technical terms like ServiceBus, DeadLetterQueue in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Service Bus Drain
//!
//! Empties Service Bus queues and topic subscriptions, together with their dead-letter
//! sub-queues, by receiving and discarding messages until each entity goes quiet.
//!
//! ## Architecture
//!
//! A drain run walks the configured targets one at a time. For each target the primary entity
//! and its `$DeadLetterQueue` are drained concurrently by two workers. A worker owns a
//! receive-and-delete processor with bounded handler concurrency, and counts what it discards.
//! A polling detector compares successive counts and stops the worker once a full polling period
//! passes without a discarded message.
//!
//! ## Module Organization
//!
//! - [`drain`] - Drain service, coordinator, workers and quiescence detection
//! - [`messaging`] - Broker client traits with REST and in-memory providers
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup and helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use servicebus_drain::config::{DrainWorkerConfig, TopicConfig};
//! use servicebus_drain::drain::DrainService;
//! use servicebus_drain::messaging::InMemoryBroker;
//!
//! # async fn example() -> servicebus_drain::Result<()> {
//! let broker = InMemoryBroker::new();
//! broker.send_batch("orders", 3);
//!
//! let service = DrainService::new(Arc::new(broker), DrainWorkerConfig::default());
//! let summary = service
//!     .drain_all(&["orders".to_string()], &[TopicConfig::new("events", "audit")])
//!     .await?;
//! println!("discarded {} messages", summary.messages_discarded());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod drain;
pub mod error;
pub mod logging;
pub mod messaging;

pub use config::{ConfigLoader, DrainConfig, DrainWorkerConfig};
pub use drain::{DrainCoordinator, DrainService, DrainSummary, ProcessingCounter};
pub use error::{DrainError, Result};
pub use messaging::{BrokerClient, InMemoryBroker, RestBrokerClient};
