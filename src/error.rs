//! Crate-level error type for drain runs

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::drain::DrainReport;
use crate::messaging::MessagingError;

/// One failing entity path within a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFailure {
    pub entity_path: String,
    pub error: String,
}

#[derive(Error, Debug)]
pub enum DrainError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Connection fault on {entity_path}: {source}")]
    Connection {
        entity_path: String,
        #[source]
        source: MessagingError,
    },

    #[error("Invariant violation in processor {processor_id}: {message}")]
    InvariantViolation {
        processor_id: String,
        message: String,
    },

    #[error("Drain of {target} failed on {} path(s): {}", failures.len(), format_failures(failures))]
    TargetFailed {
        target: String,
        failures: Vec<PathFailure>,
        /// Reports of the paths that drained successfully
        completed: Vec<DrainReport>,
    },

    #[error("Drain run failed for {} target(s): {}", failed_targets.len(), failed_targets.join(", "))]
    RunFailed { failed_targets: Vec<String> },
}

impl DrainError {
    pub fn connection(entity_path: impl Into<String>, source: MessagingError) -> Self {
        Self::Connection {
            entity_path: entity_path.into(),
            source,
        }
    }

    pub fn invariant_violation(processor_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            processor_id: processor_id.into(),
            message: message.into(),
        }
    }
}

fn format_failures(failures: &[PathFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{} ({})", failure.entity_path, failure.error))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, DrainError>;
