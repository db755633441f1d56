//! Drain worker lifecycle states

use std::fmt;

/// Lifecycle of a [`DrainWorker`](super::DrainWorker)
///
/// `Created -> Running -> Draining -> Stopped`. Any state may move to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Processor requested from the broker client
    Created,
    /// Handler registered and processing started
    Running,
    /// Detector active, waiting for quiescence, cancellation or the deadline
    Draining,
    /// Detector and processor stopped
    Stopped,
}

impl WorkerState {
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        matches!(
            (self, next),
            (WorkerState::Created, WorkerState::Running)
                | (WorkerState::Running, WorkerState::Draining)
                | (WorkerState::Created, WorkerState::Stopped)
                | (WorkerState::Running, WorkerState::Stopped)
                | (WorkerState::Draining, WorkerState::Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == WorkerState::Stopped
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Created => write!(f, "created"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Draining => write!(f, "draining"),
            WorkerState::Stopped => write!(f, "stopped"),
        }
    }
}
