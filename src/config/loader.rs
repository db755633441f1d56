//! Configuration Loader
//!
//! Reads a configuration file (TOML, JSON or YAML, chosen by extension) and layers
//! `DRAIN__`-prefixed environment variables on top of it. Nested keys use double underscores
//! (`DRAIN__SERVICE_BUS__PREFETCH_COUNT=50`); `DRAIN__QUEUES__QUEUE_NAMES` is a comma-separated
//! list.
//!
//! When the merged settings carry a `key_vault_prefix`, the `service_bus` table found under that
//! prefix is applied over the top-level `service_bus` section.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use tracing::{debug, info, warn};

use super::error::{ConfigResult, ConfigurationError};
use super::DrainConfig;
use crate::constants::{env, system};

const LIST_PARSE_KEYS: &[&str] = &["queues.queue_names"];
const LIST_SEPARATOR: &str = ",";

/// Loads and validates [`DrainConfig`]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from `path` (or the default location) plus the process environment
    pub fn load(path: Option<&Path>) -> ConfigResult<DrainConfig> {
        Self::load_with_environment(path, Self::environment_source())
    }

    /// Load configuration with an explicit environment source
    ///
    /// Useful for testing without modifying global environment variables.
    pub fn load_with_environment(
        path: Option<&Path>,
        environment: Environment,
    ) -> ConfigResult<DrainConfig> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(system::DEFAULT_CONFIG_PATH));

        if !path.is_file() {
            return Err(ConfigurationError::config_file_not_found(path));
        }

        debug!("Loading drain configuration from {}", path.display());

        let settings = Config::builder()
            .add_source(File::from(path.clone()))
            .add_source(environment)
            .build()
            .map_err(|e| ConfigurationError::load_error(path.display().to_string(), e))?;

        let settings = Self::apply_key_vault_overlay(settings)?;

        let config: DrainConfig = settings
            .try_deserialize()
            .map_err(ConfigurationError::deserialization_error)?;

        config.validate()?;

        info!(
            config_file = %path.display(),
            queues = config.queues.queue_names.len(),
            topics = config.topics.len(),
            prefetch_count = config.service_bus.prefetch_count,
            max_concurrency_calls = config.service_bus.max_concurrency_calls,
            polling_period_ms = config.service_bus.polling_period_milliseconds,
            "⚙️ CONFIG: Drain configuration loaded"
        );

        Ok(config)
    }

    /// The `DRAIN__` environment source used by [`ConfigLoader::load`]
    pub fn environment_source() -> Environment {
        let mut source = Environment::with_prefix(env::CONFIG_PREFIX)
            .prefix_separator(env::CONFIG_SEPARATOR)
            .separator(env::CONFIG_SEPARATOR)
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);

        for key in LIST_PARSE_KEYS {
            source = source.with_list_parse_key(key);
        }

        source
    }

    fn apply_key_vault_overlay(settings: Config) -> ConfigResult<Config> {
        let prefix = match settings.get_string("key_vault_prefix") {
            Ok(prefix) if !prefix.trim().is_empty() => prefix,
            Ok(_) | Err(ConfigError::NotFound(_)) => return Ok(settings),
            Err(e) => return Err(ConfigurationError::deserialization_error(e)),
        };

        let overlay_key = format!("{prefix}.service_bus");
        let overlay = match settings.get_table(&overlay_key) {
            Ok(table) => table,
            Err(ConfigError::NotFound(_)) => {
                warn!(
                    key_vault_prefix = %prefix,
                    "⚠️ CONFIG: key_vault_prefix is set but no '{}' section exists",
                    overlay_key
                );
                return Ok(settings);
            }
            Err(e) => return Err(ConfigurationError::deserialization_error(e)),
        };

        debug!(
            key_vault_prefix = %prefix,
            keys = overlay.len(),
            "Applying key vault overlay to service_bus"
        );

        let mut builder = Config::builder().add_source(settings);
        for (key, value) in overlay {
            builder = builder
                .set_override(format!("service_bus.{key}"), value)
                .map_err(|e| ConfigurationError::load_error(overlay_key.as_str(), e))?;
        }

        builder
            .build()
            .map_err(|e| ConfigurationError::load_error(overlay_key.as_str(), e))
    }
}
