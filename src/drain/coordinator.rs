//! Drains a target's primary entity and its dead-letter sub-queue side by side

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::counter::ProcessingCounter;
use super::target::DrainTarget;
use super::worker::{DrainReport, DrainWorker};
use crate::config::DrainWorkerConfig;
use crate::error::{DrainError, PathFailure, Result};
use crate::messaging::BrokerClient;

/// Outcome of draining both paths of one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub target: DrainTarget,
    pub primary: DrainReport,
    pub dead_letter: DrainReport,
}

impl TargetReport {
    pub fn messages_discarded(&self) -> u64 {
        self.primary.messages_discarded + self.dead_letter.messages_discarded
    }

    /// Wall time of the target; the two paths overlap
    pub fn elapsed(&self) -> Duration {
        self.primary.elapsed.max(self.dead_letter.elapsed)
    }
}

/// Runs the two workers of a target and waits for both
///
/// Neither worker cancels its sibling. A failure on one path is reported only after the other
/// path has finished draining.
pub struct DrainCoordinator {
    client: Arc<dyn BrokerClient>,
    counter: Arc<ProcessingCounter>,
    config: DrainWorkerConfig,
    cancel: CancellationToken,
}

impl DrainCoordinator {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        counter: Arc<ProcessingCounter>,
        config: DrainWorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            counter,
            config,
            cancel,
        }
    }

    pub async fn drain_entity_and_dead_letter(&self, entity_path: &str) -> Result<TargetReport> {
        self.drain_target(&DrainTarget::queue(entity_path)).await
    }

    pub async fn drain_subscription_and_dead_letter(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<TargetReport> {
        self.drain_target(&DrainTarget::subscription(topic, subscription))
            .await
    }

    pub async fn drain_target(&self, target: &DrainTarget) -> Result<TargetReport> {
        info!(drain_target = %target, "🎯 COORDINATOR: Draining target and dead-letter queue");

        let primary = self.worker(target.primary_path());
        let dead_letter = self.worker(target.dead_letter_path());

        let (primary, dead_letter) = tokio::join!(
            primary.run(self.cancel.child_token()),
            dead_letter.run(self.cancel.child_token()),
        );

        match (primary, dead_letter) {
            (Ok(primary), Ok(dead_letter)) => {
                let report = TargetReport {
                    target: target.clone(),
                    primary,
                    dead_letter,
                };
                info!(
                    drain_target = %target,
                    messages_discarded = report.messages_discarded(),
                    elapsed_ms = report.elapsed().as_millis() as u64,
                    "✅ COORDINATOR: Target drained"
                );
                Ok(report)
            }
            (primary, dead_letter) => {
                let mut failures = Vec::new();
                let mut completed = Vec::new();
                for (path, result) in [
                    (target.primary_path(), primary),
                    (target.dead_letter_path(), dead_letter),
                ] {
                    match result {
                        Ok(report) => completed.push(report),
                        Err(error) => failures.push(PathFailure {
                            entity_path: path,
                            error: error.to_string(),
                        }),
                    }
                }

                error!(
                    drain_target = %target,
                    failed_paths = failures.len(),
                    "❌ COORDINATOR: Target drain failed"
                );
                Err(DrainError::TargetFailed {
                    target: target.to_string(),
                    failures,
                    completed,
                })
            }
        }
    }

    fn worker(&self, entity_path: String) -> DrainWorker {
        DrainWorker::new(
            self.client.clone(),
            self.counter.clone(),
            entity_path,
            self.config.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drain::DrainOutcome;
    use crate::messaging::InMemoryBroker;

    fn coordinator(broker: &InMemoryBroker) -> DrainCoordinator {
        DrainCoordinator::new(
            Arc::new(broker.clone()),
            Arc::new(ProcessingCounter::new()),
            DrainWorkerConfig::default().with_polling_period(Duration::from_millis(1000)),
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_queue_and_dead_letter() {
        let broker = InMemoryBroker::new();
        broker.send_batch("orders", 4);
        broker.send_batch("orders/$DeadLetterQueue", 2);

        let report = coordinator(&broker)
            .drain_entity_and_dead_letter("orders")
            .await
            .unwrap();

        assert_eq!(report.primary.messages_discarded, 4);
        assert_eq!(report.dead_letter.messages_discarded, 2);
        assert_eq!(report.messages_discarded(), 6);
        assert_eq!(report.primary.outcome, DrainOutcome::Quiescent);
        assert_eq!(broker.message_count("orders"), 0);
        assert_eq!(broker.message_count("orders/$DeadLetterQueue"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_paths() {
        let broker = InMemoryBroker::new();
        broker.send_batch("events/Subscriptions/audit", 3);

        let report = coordinator(&broker)
            .drain_subscription_and_dead_letter("events", "audit")
            .await
            .unwrap();

        assert_eq!(report.primary.entity_path, "events/Subscriptions/audit");
        assert_eq!(
            report.dead_letter.entity_path,
            "events/Subscriptions/audit/$DeadLetterQueue"
        );
        assert_eq!(report.primary.messages_discarded, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_waits_for_sibling() {
        let broker = InMemoryBroker::new();
        broker.mark_unreachable("orders/$DeadLetterQueue");
        broker.send_batch("orders", 2);

        let err = coordinator(&broker)
            .drain_entity_and_dead_letter("orders")
            .await
            .unwrap_err();

        match err {
            DrainError::TargetFailed {
                failures,
                completed,
                ..
            } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].entity_path, "orders/$DeadLetterQueue");
                assert_eq!(completed.len(), 1);
                assert_eq!(completed[0].messages_discarded, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(broker.message_count("orders"), 0);
    }
}
