//! # Drain Service
//!
//! Entry point for a drain run. Queues are drained first, in configuration order, then topic
//! subscriptions. Targets run one after another; only the two paths within a target overlap.
//!
//! A failing target does not stop the run. Its failure is logged, the remaining targets are
//! drained, and the run ends with [`DrainError::RunFailed`] naming every failed target.
//! Cancelling [`DrainService::shutdown_token`] stops in-flight workers and prevents any further
//! target from starting.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::coordinator::{DrainCoordinator, TargetReport};
use super::counter::ProcessingCounter;
use super::target::DrainTarget;
use crate::config::{ConfigurationError, DrainWorkerConfig, QueueConfig, TopicConfig};
use crate::error::{DrainError, Result};
use crate::messaging::BrokerClient;

/// Reports for every target drained by one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub targets: Vec<TargetReport>,
    /// Targets that were never started because the run was cancelled
    pub skipped: Vec<DrainTarget>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl DrainSummary {
    pub fn messages_discarded(&self) -> u64 {
        self.targets.iter().map(TargetReport::messages_discarded).sum()
    }
}

pub struct DrainService {
    client: Arc<dyn BrokerClient>,
    config: DrainWorkerConfig,
    counter: Arc<ProcessingCounter>,
    shutdown: CancellationToken,
}

impl DrainService {
    pub fn new(client: Arc<dyn BrokerClient>, config: DrainWorkerConfig) -> Self {
        Self {
            client,
            config,
            counter: Arc::new(ProcessingCounter::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that cancels the run
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn counter(&self) -> &Arc<ProcessingCounter> {
        &self.counter
    }

    /// Drain every queue, then every topic subscription
    pub async fn drain_all(
        &self,
        queue_names: &[String],
        topics: &[TopicConfig],
    ) -> Result<DrainSummary> {
        self.config.validate()?;
        validate_targets(queue_names, topics)?;

        let targets: Vec<DrainTarget> = queue_names
            .iter()
            .map(|name| DrainTarget::queue(name.trim()))
            .chain(topics.iter().map(|topic| {
                DrainTarget::subscription(topic.topic_name.trim(), topic.subscription_name.trim())
            }))
            .collect();

        info!(
            provider = self.client.provider_name(),
            queues = queue_names.len(),
            subscriptions = topics.len(),
            "🚀 DRAIN_SERVICE: Starting drain run"
        );

        let started = Instant::now();
        let coordinator = DrainCoordinator::new(
            self.client.clone(),
            self.counter.clone(),
            self.config.clone(),
            self.shutdown.clone(),
        );

        let mut summary = DrainSummary::default();
        let mut failed_targets = Vec::new();
        let mut pending = targets.into_iter();

        while let Some(target) = pending.next() {
            if self.shutdown.is_cancelled() {
                summary.cancelled = true;
                summary.skipped.push(target);
                summary.skipped.extend(pending.by_ref());
                break;
            }

            match coordinator.drain_target(&target).await {
                Ok(report) => summary.targets.push(report),
                Err(drain_error) => {
                    error!(
                        drain_target = %target,
                        error = %drain_error,
                        "❌ DRAIN_SERVICE: Target failed, continuing with remaining targets"
                    );
                    failed_targets.push(target.to_string());
                }
            }
        }

        summary.cancelled |= self.shutdown.is_cancelled();
        summary.elapsed = started.elapsed();

        if summary.cancelled {
            warn!(
                skipped = summary.skipped.len(),
                "🛑 DRAIN_SERVICE: Drain run cancelled"
            );
        }

        if !failed_targets.is_empty() {
            return Err(DrainError::RunFailed { failed_targets });
        }

        info!(
            targets = summary.targets.len(),
            messages_discarded = summary.messages_discarded(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "✅ DRAIN_SERVICE: Drain run complete"
        );
        Ok(summary)
    }
}

fn validate_targets(
    queue_names: &[String],
    topics: &[TopicConfig],
) -> std::result::Result<(), ConfigurationError> {
    QueueConfig::validate_names(queue_names)?;
    for (index, topic) in topics.iter().enumerate() {
        topic.validate(index)?;
    }
    Ok(())
}
