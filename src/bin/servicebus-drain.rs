//! # Service Bus Drain
//!
//! Drains every queue and topic subscription named in the configuration file, including their
//! dead-letter sub-queues, then exits. Ctrl-C stops the run after the in-flight target's
//! processors are closed.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use secrecy::ExposeSecret;
use tracing::{error, info, warn};

use servicebus_drain::config::ConfigLoader;
use servicebus_drain::constants::system;
use servicebus_drain::drain::DrainService;
use servicebus_drain::logging::{get_environment, init_structured_logging_with};
use servicebus_drain::messaging::{ConnectionString, RestBrokerClient};

#[derive(Parser)]
#[command(name = "servicebus-drain")]
#[command(about = "Receive and discard all messages from Service Bus queues and subscriptions")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, default_value = system::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Environment name used for log levels (defaults to DRAIN_ENV, then APP_ENV)
    #[arg(short, long)]
    environment: Option<String>,

    /// Force debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let environment = cli.environment.clone().unwrap_or_else(get_environment);
    init_structured_logging_with(&environment, cli.verbose);

    match run(cli).await {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(1),
        Err(e) => {
            error!(error = %format!("{e:#}"), "❌ Drain failed");
            process::exit(1);
        }
    }
}

/// `Ok(false)` when the run was interrupted
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = ConfigLoader::load(Some(&cli.config))
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    let connection = ConnectionString::parse(config.service_bus.connection_string.expose_secret())
        .context("parsing service_bus.connection_string")?;
    let worker_config = config.worker_config();
    let client = RestBrokerClient::new(&connection, &worker_config)
        .context("creating Service Bus client")?;

    let service = DrainService::new(Arc::new(client), worker_config);
    let shutdown = service.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, stopping drain");
            shutdown.cancel();
        }
    });

    let summary = service
        .drain_all(&config.queues.queue_names, &config.topics)
        .await?;

    info!(
        targets = summary.targets.len(),
        messages_discarded = summary.messages_discarded(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        cancelled = summary.cancelled,
        "🏁 Drain finished"
    );
    Ok(!summary.cancelled)
}
