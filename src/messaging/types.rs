//! # Messaging Types
//!
//! Processor options and the payloads handed to message handlers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessagingError;

/// How messages are settled when received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveMode {
    /// Message is locked on receipt and must be completed explicitly
    PeekLock,
    /// Message is removed from the entity at receipt
    #[default]
    ReceiveAndDelete,
}

/// Options used when creating a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorOptions {
    /// Upper bound on concurrent handler invocations
    pub max_concurrent_calls: u32,
    /// Number of messages buffered ahead of the handlers (0 = fetch on demand)
    pub prefetch_count: u32,
    pub receive_mode: ReceiveMode,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 1,
            prefetch_count: 0,
            receive_mode: ReceiveMode::ReceiveAndDelete,
        }
    }
}

/// A message received from an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
}

impl BrokerMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            correlation_id: None,
            body: body.into(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Arguments passed to [`MessageHandler::process_message`](super::MessageHandler::process_message)
#[derive(Debug, Clone)]
pub struct ProcessMessageContext {
    pub message: BrokerMessage,
    pub entity_path: String,
    /// Identifier of the processor that received the message
    pub identifier: String,
}

/// Where a reported error originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSource {
    /// Fetching a message from the broker failed
    Receive,
    /// The registered message handler returned an error
    UserCallback,
    /// The connection to the broker failed while processing
    Connection,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSource::Receive => write!(f, "receive"),
            ErrorSource::UserCallback => write!(f, "user_callback"),
            ErrorSource::Connection => write!(f, "connection"),
        }
    }
}

/// Arguments passed to [`MessageHandler::process_error`](super::MessageHandler::process_error)
#[derive(Debug, Clone)]
pub struct ProcessErrorContext {
    pub error: MessagingError,
    pub error_source: ErrorSource,
    pub entity_path: String,
    pub identifier: String,
}
