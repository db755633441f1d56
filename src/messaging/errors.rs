//! # Messaging Error Types
//!
//! Errors raised by broker clients and processors, using thiserror for structured error types
//! instead of `Box<dyn Error>` patterns.

use thiserror::Error;

/// Broker client and processor errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Connection error for {entity_path}: {message}")]
    Connection {
        entity_path: String,
        message: String,
    },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Messaging entity not found: {entity_path}")]
    EntityNotFound { entity_path: String },

    #[error("Receive failed for {entity_path}: {message}")]
    Receive {
        entity_path: String,
        message: String,
    },

    #[error("Message handler failed for {entity_path}: {message}")]
    Handler {
        entity_path: String,
        message: String,
    },

    #[error("Invalid processor state: {message}")]
    InvalidState { message: String },

    #[error("Invalid connection string: {reason}")]
    InvalidConnectionString { reason: String },

    #[error("Network timeout: operation {operation} timed out after {timeout_seconds}s")]
    Timeout {
        operation: String,
        timeout_seconds: u64,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(entity_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            entity_path: entity_path.into(),
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create an entity not found error
    pub fn entity_not_found(entity_path: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity_path: entity_path.into(),
        }
    }

    /// Create a receive error
    pub fn receive(entity_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Receive {
            entity_path: entity_path.into(),
            message: message.into(),
        }
    }

    /// Create a handler error
    pub fn handler(entity_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            entity_path: entity_path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an invalid connection string error
    pub fn invalid_connection_string(reason: impl Into<String>) -> Self {
        Self::InvalidConnectionString {
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation may succeed
    ///
    /// Authentication failures and missing entities never clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Receive { .. }
                | Self::Timeout { .. }
                | Self::Protocol { .. }
        )
    }
}

/// Conversion from reqwest::Error to MessagingError
impl From<reqwest::Error> for MessagingError {
    fn from(err: reqwest::Error) -> Self {
        let entity_path = err
            .url()
            .map(|url| url.path().trim_start_matches('/').to_string())
            .unwrap_or_default();

        if err.is_timeout() {
            MessagingError::timeout("http_request", 0)
        } else if err.is_connect() {
            MessagingError::connection(entity_path, err.to_string())
        } else if err.is_decode() || err.is_body() {
            MessagingError::protocol(err.to_string())
        } else {
            MessagingError::receive(entity_path, err.to_string())
        }
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messaging_error_creation() {
        let err = MessagingError::connection("orders", "unreachable");
        assert!(matches!(err, MessagingError::Connection { .. }));

        let err = MessagingError::receive("orders", "lock lost");
        assert!(matches!(err, MessagingError::Receive { .. }));

        let err = MessagingError::timeout("receive", 30);
        assert!(matches!(err, MessagingError::Timeout { .. }));
    }

    #[test]
    fn test_transient_classification() {
        assert!(MessagingError::connection("orders", "reset").is_transient());
        assert!(MessagingError::timeout("receive", 5).is_transient());
        assert!(MessagingError::protocol("truncated body").is_transient());
        assert!(!MessagingError::authentication("bad key").is_transient());
        assert!(!MessagingError::entity_not_found("orders").is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = MessagingError::receive("orders/$DeadLetterQueue", "broker busy");
        let display_str = format!("{err}");
        assert!(display_str.contains("Receive failed"));
        assert!(display_str.contains("orders/$DeadLetterQueue"));
        assert!(display_str.contains("broker busy"));
    }
}
