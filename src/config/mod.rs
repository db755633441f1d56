//! # Configuration
//!
//! Settings for a drain run: the Service Bus connection, the drain tunables and the list of
//! queue and topic subscription targets.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use servicebus_drain::config::ConfigLoader;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load(None)?;
//! let worker_config = config.worker_config();
//! println!("polling every {:?}", worker_config.polling_period);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::constants::limits;

const SECONDS_PER_HOUR: u64 = 3600;

/// Root configuration for a drain run
#[derive(Debug, Clone, Deserialize)]
pub struct DrainConfig {
    /// Connection and tunables
    pub service_bus: ServiceBusConfig,

    /// Queues to drain, in order
    #[serde(default)]
    pub queues: QueueConfig,

    /// Topic subscriptions to drain, in order, after the queues
    #[serde(default)]
    pub topics: Vec<TopicConfig>,

    /// Name of a top-level table whose `service_bus` section overrides `service_bus`
    /// (secrets mounted from a vault under a prefix)
    #[serde(default)]
    pub key_vault_prefix: Option<String>,
}

impl DrainConfig {
    /// Validate every section; the first failure is returned
    pub fn validate(&self) -> ConfigResult<()> {
        self.service_bus.validate()?;
        self.queues.validate()?;
        for (index, topic) in self.topics.iter().enumerate() {
            topic.validate(index)?;
        }
        Ok(())
    }

    /// Tunables snapshot handed to every drain worker
    pub fn worker_config(&self) -> DrainWorkerConfig {
        self.service_bus.worker_config()
    }
}

/// Service Bus connection and drain tunables
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceBusConfig {
    /// `Endpoint=sb://...;SharedAccessKeyName=...;SharedAccessKey=...`
    pub connection_string: SecretString,

    pub connection_timeout_seconds: u64,

    pub delete_batch_size: u32,

    pub time_to_live_hours: u64,

    /// Number of messages the processor may buffer ahead of the handlers
    pub prefetch_count: u32,

    /// Number of handler invocations allowed to run at once
    pub max_concurrency_calls: u32,

    /// How often the processed-message counter is sampled to decide whether the entity is empty
    pub polling_period_milliseconds: u64,

    /// Upper bound on how long a single entity may be drained
    #[serde(default)]
    pub max_drain_duration_seconds: Option<u64>,
}

impl ServiceBusConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.connection_string.expose_secret().trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "connection_string",
                "service_bus",
            ));
        }

        require_positive("connection_timeout_seconds", self.connection_timeout_seconds)?;
        require_positive("delete_batch_size", u64::from(self.delete_batch_size))?;
        require_positive("time_to_live_hours", self.time_to_live_hours)?;
        if self.time_to_live_hours.checked_mul(SECONDS_PER_HOUR).is_none() {
            return Err(ConfigurationError::invalid_value(
                "time_to_live_hours",
                self.time_to_live_hours.to_string(),
                "is too large to express in seconds",
            ));
        }

        if let Some(seconds) = self.max_drain_duration_seconds {
            require_positive("max_drain_duration_seconds", seconds)?;
        }

        self.worker_config().validate()
    }

    pub fn worker_config(&self) -> DrainWorkerConfig {
        DrainWorkerConfig {
            connection_timeout: Duration::from_secs(self.connection_timeout_seconds),
            delete_batch_size: self.delete_batch_size,
            time_to_live: Duration::from_secs(
                self.time_to_live_hours.saturating_mul(SECONDS_PER_HOUR),
            ),
            prefetch_count: self.prefetch_count,
            max_concurrent_calls: self.max_concurrency_calls,
            polling_period: Duration::from_millis(self.polling_period_milliseconds),
            max_drain_duration: self.max_drain_duration_seconds.map(Duration::from_secs),
        }
    }
}

fn require_positive(field: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigurationError::invalid_value(
            field,
            value.to_string(),
            "must be greater than zero",
        ));
    }
    Ok(())
}

/// Queue targets
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub queue_names: Vec<String>,
}

impl QueueConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        Self::validate_names(&self.queue_names)
    }

    /// Every queue name must be non-blank
    pub fn validate_names(queue_names: &[String]) -> ConfigResult<()> {
        for (index, name) in queue_names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    format!("queue_names[{index}]"),
                    "queues",
                ));
            }
        }
        Ok(())
    }
}

/// A topic subscription target
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicConfig {
    pub topic_name: String,
    pub subscription_name: String,
}

impl TopicConfig {
    pub fn new(topic_name: impl Into<String>, subscription_name: impl Into<String>) -> Self {
        Self {
            topic_name: topic_name.into(),
            subscription_name: subscription_name.into(),
        }
    }

    pub fn validate(&self, index: usize) -> ConfigResult<()> {
        if self.topic_name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                format!("topics[{index}].topic_name"),
                "topics",
            ));
        }
        if self.subscription_name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                format!("topics[{index}].subscription_name"),
                "topics",
            ));
        }
        Ok(())
    }
}

/// Immutable tunables for one drain worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainWorkerConfig {
    pub connection_timeout: Duration,
    pub delete_batch_size: u32,
    pub time_to_live: Duration,
    pub prefetch_count: u32,
    pub max_concurrent_calls: u32,
    pub polling_period: Duration,
    /// Forces the worker to stop after this long even if messages keep arriving
    pub max_drain_duration: Option<Duration>,
}

impl Default for DrainWorkerConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            delete_batch_size: 100,
            time_to_live: Duration::from_secs(24 * 3600),
            prefetch_count: 50,
            max_concurrent_calls: 20,
            polling_period: Duration::from_millis(2_000),
            max_drain_duration: None,
        }
    }
}

impl DrainWorkerConfig {
    /// Check the tunables against their accepted ranges
    pub fn validate(&self) -> ConfigResult<()> {
        if !(limits::MIN_PREFETCH_COUNT..=limits::MAX_PREFETCH_COUNT).contains(&self.prefetch_count)
        {
            return Err(ConfigurationError::invalid_value(
                "prefetch_count",
                self.prefetch_count.to_string(),
                format!(
                    "must be between {} and {}",
                    limits::MIN_PREFETCH_COUNT,
                    limits::MAX_PREFETCH_COUNT
                ),
            ));
        }

        if !(limits::MIN_CONCURRENT_CALLS..=limits::MAX_CONCURRENT_CALLS)
            .contains(&self.max_concurrent_calls)
        {
            return Err(ConfigurationError::invalid_value(
                "max_concurrency_calls",
                self.max_concurrent_calls.to_string(),
                format!(
                    "must be between {} and {}",
                    limits::MIN_CONCURRENT_CALLS,
                    limits::MAX_CONCURRENT_CALLS
                ),
            ));
        }

        let polling_ms = self.polling_period.as_millis();
        if !(u128::from(limits::MIN_POLLING_PERIOD_MS)..=u128::from(limits::MAX_POLLING_PERIOD_MS))
            .contains(&polling_ms)
        {
            return Err(ConfigurationError::invalid_value(
                "polling_period_milliseconds",
                polling_ms.to_string(),
                format!(
                    "must be between {} and {}",
                    limits::MIN_POLLING_PERIOD_MS,
                    limits::MAX_POLLING_PERIOD_MS
                ),
            ));
        }

        Ok(())
    }

    pub fn with_polling_period(mut self, polling_period: Duration) -> Self {
        self.polling_period = polling_period;
        self
    }

    pub fn with_concurrency(mut self, max_concurrent_calls: u32, prefetch_count: u32) -> Self {
        self.max_concurrent_calls = max_concurrent_calls;
        self.prefetch_count = prefetch_count;
        self
    }

    pub fn with_max_drain_duration(mut self, max_drain_duration: Duration) -> Self {
        self.max_drain_duration = Some(max_drain_duration);
        self
    }
}
