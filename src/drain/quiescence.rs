//! # Quiescence Detection
//!
//! Decides when an entity has gone idle by sampling a processor's discard count once per polling
//! period. Two consecutive equal samples mean no message was discarded in between, and the
//! detector requests a stop. The stored sample starts at zero, so an entity that never yields a
//! message stops after exactly one period.
//!
//! The heuristic is best-effort. A message discarded just after a sample shows up one period
//! later, and a message that arrives after the stop decision is left on the entity. Neither case
//! is treated as an error.
//!
//! A sample lower than the previous one cannot happen with a monotonic counter. It is recorded
//! as an invariant violation and also stops the detector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::counter::ProcessingCounter;

/// Result of comparing one sample with the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The count moved since the last sample
    Active,
    /// The count did not move; stop has been requested
    Quiescent,
    /// The count went backwards; stop has been requested
    Regressed { previous: u64, observed: u64 },
}

/// Count regression recorded by a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRegression {
    pub previous: u64,
    pub observed: u64,
}

/// State shared between a detector's ticks and the worker waiting on it
#[derive(Debug, Default)]
pub struct QuiescenceState {
    previous: Mutex<u64>,
    stop_requested: AtomicBool,
    regression: Mutex<Option<CounterRegression>>,
    wake: Notify,
}

impl QuiescenceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one sample
    pub fn observe(&self, observed: u64) -> TickOutcome {
        let mut previous = self.previous.lock();
        let last = *previous;
        *previous = observed;
        drop(previous);

        let outcome = if observed == last {
            TickOutcome::Quiescent
        } else if observed < last {
            *self.regression.lock() = Some(CounterRegression {
                previous: last,
                observed,
            });
            TickOutcome::Regressed {
                previous: last,
                observed,
            }
        } else {
            TickOutcome::Active
        };

        if outcome != TickOutcome::Active {
            self.request_stop();
        }
        outcome
    }

    pub fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::AcqRel) {
            self.wake.notify_one();
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn regression(&self) -> Option<CounterRegression> {
        *self.regression.lock()
    }

    pub fn last_observed(&self) -> u64 {
        *self.previous.lock()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        while !self.stop_requested() {
            self.wake.notified().await;
        }
    }
}

/// Spawns polling detectors
pub struct QuiescenceDetector;

impl QuiescenceDetector {
    /// Start sampling `identifier` in `counter` every `period`, first sample one period from now
    pub fn start(
        counter: Arc<ProcessingCounter>,
        identifier: impl Into<String>,
        period: Duration,
    ) -> QuiescenceHandle {
        let identifier = identifier.into();
        let label = identifier.clone();
        Self::start_with_sampler(label, period, move || counter.get(&identifier))
    }

    /// Start sampling an arbitrary monotonic source
    pub fn start_with_sampler<F>(
        identifier: impl Into<String>,
        period: Duration,
        sample: F,
    ) -> QuiescenceHandle
    where
        F: Fn() -> u64 + Send + 'static,
    {
        let identifier = identifier.into();
        let state = Arc::new(QuiescenceState::new());
        let tick_state = state.clone();

        let task = tokio::spawn(async move {
            let mut ticks = time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticks.tick().await;
                let observed = sample();

                match tick_state.observe(observed) {
                    TickOutcome::Active => {
                        debug!(
                            processor = %identifier,
                            count = observed,
                            "📊 QUIESCENCE: Count advanced"
                        );
                    }
                    TickOutcome::Quiescent => {
                        info!(
                            processor = %identifier,
                            count = observed,
                            "✅ QUIESCENCE: No progress since last sample, requesting stop"
                        );
                        break;
                    }
                    TickOutcome::Regressed { previous, observed } => {
                        error!(
                            processor = %identifier,
                            previous = previous,
                            observed = observed,
                            "❌ QUIESCENCE: Processed count went backwards"
                        );
                        break;
                    }
                }
            }
        });

        QuiescenceHandle {
            state,
            task: task.abort_handle(),
        }
    }
}

/// Owner handle of a running detector; dropping it stops the detector
#[derive(Debug)]
pub struct QuiescenceHandle {
    state: Arc<QuiescenceState>,
    task: AbortHandle,
}

impl QuiescenceHandle {
    pub fn state(&self) -> &Arc<QuiescenceState> {
        &self.state
    }

    /// Cancel future ticks. Idempotent.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for QuiescenceHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
