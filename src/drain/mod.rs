//! # Drain Core
//!
//! Receive-and-discard draining of broker entities.
//!
//! ## Key Components
//!
//! - [`DrainService`] - drains every configured queue and subscription, one target at a time
//! - [`DrainCoordinator`] - drains a target's primary path and dead-letter path concurrently
//! - [`DrainWorker`] - drains one entity path until it goes quiet
//! - [`QuiescenceDetector`] - decides when a path has gone quiet
//! - [`ProcessingCounter`] - per-run discard counts shared by handlers and detectors

pub mod coordinator;
pub mod counter;
pub mod handler;
pub mod quiescence;
pub mod service;
pub mod state;
pub mod target;
pub mod worker;

pub use coordinator::{DrainCoordinator, TargetReport};
pub use counter::ProcessingCounter;
pub use handler::DrainMessageHandler;
pub use quiescence::{QuiescenceDetector, QuiescenceHandle, QuiescenceState, TickOutcome};
pub use service::{DrainService, DrainSummary};
pub use state::WorkerState;
pub use target::{dead_letter_path, subscription_path, DrainTarget};
pub use worker::{DrainOutcome, DrainReport, DrainWorker};
