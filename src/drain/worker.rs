//! # Drain Worker
//!
//! Drains one entity path. The worker creates a receive-and-delete processor, registers a
//! [`DrainMessageHandler`] that counts every discarded message, and waits on a
//! [`QuiescenceDetector`] sampling that count.
//!
//! Once a processor exists it is always stopped and closed, whatever ends the drain. Cleanup
//! failures are logged and never replace the drain result.
//!
//! A non-transient error reported by the processor (the credential was rejected, the entity does
//! not exist) ends the drain with [`DrainError::Connection`]. Without it a broker that refuses
//! every receive would look exactly like an empty entity.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::counter::ProcessingCounter;
use super::handler::DrainMessageHandler;
use super::quiescence::{QuiescenceDetector, QuiescenceHandle};
use super::state::WorkerState;
use crate::config::DrainWorkerConfig;
use crate::error::{DrainError, Result};
use crate::logging::{log_drain_operation, log_error, TimedOperation};
use crate::messaging::{BrokerClient, Processor, ProcessorOptions, ReceiveMode};

/// Why a worker stopped draining
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Two consecutive samples saw the same count
    Quiescent,
    /// The cancellation token fired
    Cancelled,
    /// `max_drain_duration` elapsed first
    TimedOut,
}

impl DrainOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DrainOutcome::Quiescent => "quiescent",
            DrainOutcome::Cancelled => "cancelled",
            DrainOutcome::TimedOut => "timed_out",
        }
    }
}

/// Result of draining one entity path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub entity_path: String,
    pub processor_id: String,
    pub messages_discarded: u64,
    /// Errors the processor reported through the error callback
    pub faults_reported: u64,
    pub outcome: DrainOutcome,
    pub elapsed: Duration,
}

/// Reads the discard count the detector compares between ticks
pub type CountSampler = Arc<dyn Fn(&ProcessingCounter, &str) -> u64 + Send + Sync>;

/// Drains a single entity path
pub struct DrainWorker {
    client: Arc<dyn BrokerClient>,
    counter: Arc<ProcessingCounter>,
    entity_path: String,
    config: DrainWorkerConfig,
    sampler: Option<CountSampler>,
    state: WorkerState,
}

impl std::fmt::Debug for DrainWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainWorker")
            .field("provider", &self.client.provider_name())
            .field("entity_path", &self.entity_path)
            .field("state", &self.state)
            .finish()
    }
}

impl DrainWorker {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        counter: Arc<ProcessingCounter>,
        entity_path: impl Into<String>,
        config: DrainWorkerConfig,
    ) -> Self {
        Self {
            client,
            counter,
            entity_path: entity_path.into(),
            config,
            sampler: None,
            state: WorkerState::Created,
        }
    }

    /// Replace the default `counter.get(identifier)` sample
    pub fn with_sampler<F>(mut self, sampler: F) -> Self
    where
        F: Fn(&ProcessingCounter, &str) -> u64 + Send + Sync + 'static,
    {
        self.sampler = Some(Arc::new(sampler));
        self
    }

    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Drain the entity until it goes quiet, `cancel` fires or the deadline passes
    pub async fn run(mut self, cancel: CancellationToken) -> Result<DrainReport> {
        let _timer = TimedOperation::start("drain_entity", self.entity_path.clone());
        let started = Instant::now();

        let options = ProcessorOptions {
            max_concurrent_calls: self.config.max_concurrent_calls,
            prefetch_count: self.config.prefetch_count,
            receive_mode: ReceiveMode::ReceiveAndDelete,
        };
        let mut processor = match self.client.create_processor(&self.entity_path, options).await {
            Ok(processor) => processor,
            Err(error) => {
                log_error(
                    "drain_worker",
                    "create_processor",
                    &error.to_string(),
                    Some(&self.entity_path),
                );
                self.transition(WorkerState::Stopped)?;
                return Err(DrainError::connection(&self.entity_path, error));
            }
        };

        let identifier = processor.identifier().to_string();
        self.counter.register(&identifier);
        let handler = Arc::new(DrainMessageHandler::new(self.counter.clone()));

        let drained = self
            .drain(processor.as_mut(), handler.clone(), &identifier, &cancel, started)
            .await;

        self.release(processor.as_mut(), &identifier).await;
        self.transition(WorkerState::Stopped)?;

        let outcome = drained?;
        let report = DrainReport {
            entity_path: self.entity_path.clone(),
            messages_discarded: self.counter.get(&identifier),
            processor_id: identifier,
            faults_reported: handler.fault_count(),
            outcome,
            elapsed: started.elapsed(),
        };

        log_drain_operation(
            "drain",
            &report.entity_path,
            Some(&report.processor_id),
            report.outcome.as_str(),
            Some(report.messages_discarded),
            None,
        );
        Ok(report)
    }

    async fn drain(
        &mut self,
        processor: &mut dyn Processor,
        handler: Arc<DrainMessageHandler>,
        identifier: &str,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<DrainOutcome> {
        processor.register_handler(handler.clone());
        processor
            .start_processing()
            .await
            .map_err(|error| DrainError::connection(&self.entity_path, error))?;
        self.transition(WorkerState::Running)?;

        info!(
            entity_path = %self.entity_path,
            processor = %identifier,
            provider = self.client.provider_name(),
            max_concurrent_calls = self.config.max_concurrent_calls,
            prefetch_count = self.config.prefetch_count,
            "🚀 DRAIN_WORKER: Draining started"
        );

        let detector = self.start_detector(identifier);
        self.transition(WorkerState::Draining)?;

        let outcome = self
            .wait(&detector, &handler, identifier, cancel, started)
            .await;
        detector.stop();

        if let Some(regression) = detector.state().regression() {
            return Err(DrainError::invariant_violation(
                identifier,
                format!(
                    "processed count for {} went from {} to {}",
                    self.entity_path, regression.previous, regression.observed
                ),
            ));
        }
        outcome
    }

    fn start_detector(&self, identifier: &str) -> QuiescenceHandle {
        let period = self.config.polling_period;
        match &self.sampler {
            Some(sampler) => {
                let sampler = sampler.clone();
                let counter = self.counter.clone();
                let sampled = identifier.to_string();
                QuiescenceDetector::start_with_sampler(identifier, period, move || {
                    sampler(&counter, &sampled)
                })
            }
            None => QuiescenceDetector::start(self.counter.clone(), identifier, period),
        }
    }

    async fn wait(
        &self,
        detector: &QuiescenceHandle,
        handler: &DrainMessageHandler,
        identifier: &str,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<DrainOutcome> {
        let period = self.config.polling_period;
        let deadline = self.config.max_drain_duration.map(|limit| started + limit);
        let quiescence = detector.state().clone();

        let mut progress = time::interval_at(Instant::now() + period, period);
        progress.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if let Some(error) = handler.fatal_error() {
                return Err(DrainError::connection(&self.entity_path, error));
            }
            if quiescence.stop_requested() {
                return Ok(DrainOutcome::Quiescent);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(
                        entity_path = %self.entity_path,
                        processor = %identifier,
                        "🛑 DRAIN_WORKER: Cancelled before quiescence"
                    );
                    return Ok(DrainOutcome::Cancelled);
                }
                error = handler.failed() => {
                    return Err(DrainError::connection(&self.entity_path, error));
                }
                _ = sleep_until(deadline) => {
                    warn!(
                        entity_path = %self.entity_path,
                        processor = %identifier,
                        count = self.counter.get(identifier),
                        "⏰ DRAIN_WORKER: Maximum drain duration reached"
                    );
                    return Ok(DrainOutcome::TimedOut);
                }
                _ = quiescence.stopped() => {}
                _ = progress.tick() => {
                    info!(
                        entity_path = %self.entity_path,
                        processor = %identifier,
                        count = self.counter.get(identifier),
                        "📊 DRAIN_WORKER: Draining"
                    );
                }
            }
        }
    }

    async fn release(&self, processor: &mut dyn Processor, identifier: &str) {
        if let Err(error) = processor.stop_processing().await {
            log_error(
                "drain_worker",
                "stop_processing",
                &error.to_string(),
                Some(identifier),
            );
        }
        if let Err(error) = processor.close().await {
            log_error("drain_worker", "close", &error.to_string(), Some(identifier));
        }
        debug!(
            entity_path = %self.entity_path,
            processor = %identifier,
            "🔒 DRAIN_WORKER: Processor released"
        );
    }

    fn transition(&mut self, next: WorkerState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DrainError::invariant_violation(
                &self.entity_path,
                format!("invalid worker transition {} -> {}", self.state, next),
            ));
        }
        debug!(
            entity_path = %self.entity_path,
            from = %self.state,
            to = %next,
            "DRAIN_WORKER: State transition"
        );
        self.state = next;
        Ok(())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
