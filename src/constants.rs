//! # System Constants
//!
//! Broker naming conventions and the operational boundaries of the drain tunables.

/// Service Bus entity naming
pub mod entity {
    /// Marker segment appended to an entity path to address its dead-letter sub-queue
    pub const DEAD_LETTER_SUFFIX: &str = "/$DeadLetterQueue";

    /// Segment separating a topic from its subscription in a subscription path
    pub const SUBSCRIPTIONS_SEGMENT: &str = "Subscriptions";
}

/// Accepted ranges for the drain tunables (inclusive)
pub mod limits {
    pub const MIN_PREFETCH_COUNT: u32 = 0;
    pub const MAX_PREFETCH_COUNT: u32 = 200;

    pub const MIN_CONCURRENT_CALLS: u32 = 1;
    pub const MAX_CONCURRENT_CALLS: u32 = 200;

    /// Lower bound keeps the sampler from busy-polling
    pub const MIN_POLLING_PERIOD_MS: u64 = 1_000;
    /// Upper bound keeps shutdown responsive
    pub const MAX_POLLING_PERIOD_MS: u64 = 10_000;
}

/// Environment variable names
pub mod env {
    /// Prefix for configuration overrides, e.g. `DRAIN__SERVICE_BUS__PREFETCH_COUNT`
    pub const CONFIG_PREFIX: &str = "DRAIN";
    pub const CONFIG_SEPARATOR: &str = "__";

    pub const ENVIRONMENT: &str = "DRAIN_ENV";
    pub const FALLBACK_ENVIRONMENT: &str = "APP_ENV";
    pub const LOG_DIR: &str = "DRAIN_LOG_DIR";
}

pub mod system {
    /// Default configuration file, relative to the working directory
    pub const DEFAULT_CONFIG_PATH: &str = "config/drain.toml";

    pub const DEFAULT_ENVIRONMENT: &str = "development";
}
