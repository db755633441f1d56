//! # Structured Logging Module
//!
//! Environment-aware structured logging. Console output is always on; setting `DRAIN_LOG_DIR`
//! adds a JSON file layer so long drain runs leave a machine-readable trail.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use std::time::Instant;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::constants::{env, system};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    init_structured_logging_with(&get_environment(), false);
}

/// Initialize structured logging for an explicit environment; `verbose` forces debug output
pub fn init_structured_logging_with(environment: &str, verbose: bool) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = environment.to_string();
        let filter = if verbose {
            "debug".to_string()
        } else {
            get_log_filter(&environment)
        };
        let pid = process::id();

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(filter.clone()));

        let mut log_path = None;
        let file_layer = std::env::var(env::LOG_DIR).ok().and_then(|dir| {
            let log_dir = PathBuf::from(dir);
            if let Err(error) = fs::create_dir_all(&log_dir) {
                eprintln!("Failed to create log directory {}: {error}", log_dir.display());
                return None;
            }

            let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
            let log_filename = format!("{environment}.{pid}.{timestamp}.log");
            log_path = Some(log_dir.join(&log_filename));

            let file_appender = tracing_appender::rolling::never(&log_dir, log_filename);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            // The writer must outlive every span in the process
            std::mem::forget(guard);

            Some(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(filter.clone())),
            )
        });

        let subscriber = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = log_path.as_ref().map(|path| path.display().to_string()),
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
pub fn get_environment() -> String {
    std::env::var(env::ENVIRONMENT)
        .or_else(|_| std::env::var(env::FALLBACK_ENVIRONMENT))
        .unwrap_or_else(|_| system::DEFAULT_ENVIRONMENT.to_string())
}

/// `RUST_LOG` when set, otherwise the environment default
fn get_log_filter(environment: &str) -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| get_log_level(environment).to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for drain operations
pub fn log_drain_operation(
    operation: &str,
    entity_path: &str,
    processor_id: Option<&str>,
    status: &str,
    messages_discarded: Option<u64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        entity_path = %entity_path,
        processor_id = processor_id,
        status = %status,
        messages_discarded = messages_discarded,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🚰 DRAIN_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

/// Logs the elapsed time of an operation when dropped
#[derive(Debug)]
pub struct TimedOperation {
    operation: &'static str,
    subject: String,
    started: Instant,
}

impl TimedOperation {
    pub fn start(operation: &'static str, subject: impl Into<String>) -> Self {
        Self {
            operation,
            subject: subject.into(),
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}

impl Drop for TimedOperation {
    fn drop(&mut self) {
        tracing::info!(
            operation = self.operation,
            subject = %self.subject,
            duration_ms = self.elapsed_ms() as u64,
            "⏱️ TIMED_OPERATION: Completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_detection() {
        std::env::set_var(env::ENVIRONMENT, "test_override");
        let environment = get_environment();
        assert_eq!(environment, "test_override");
        std::env::remove_var(env::ENVIRONMENT);
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_timed_operation_measures_elapsed() {
        let timer = TimedOperation::start("drain", "orders");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5);
    }
}
