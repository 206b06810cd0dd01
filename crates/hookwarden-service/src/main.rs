//! # Hookwarden Service
//!
//! Binary entry point for the Hookwarden webhook ingestion service.
//!
//! This executable:
//! - Loads configuration from files and environment
//! - Initializes structured logging and metrics
//! - Builds the ledger, circuit breakers, forwarding handlers and dispatcher
//! - Runs the background sweeper alongside the HTTP server from hookwarden-api
//!
//! Exit codes: `1` bind failure, `2` server failure, `3` configuration error.

mod forward;
mod sweeper;

use anyhow::Context;
use hookwarden_api::{
    shutdown_signal, start_server, AppState, ConfigError, LedgerBackend, LoggingConfig,
    ServiceConfig, ServiceError, ServiceMetrics,
};
use hookwarden_core::{
    CircuitBreakerRegistry, EventDispatcher, EventLedger, FilesystemEventLedger,
    InMemoryEventLedger,
};
use std::sync::Arc;
use sweeper::Sweeper;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CONFIG_FILE_ENV: &str = "HOOKWARDEN_CONFIG_FILE";
const ENV_PREFIX: &str = "HW";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded = load_config();

    let default_logging = LoggingConfig::default();
    init_logging(
        loaded
            .as_ref()
            .map(|config| &config.logging)
            .unwrap_or(&default_logging),
    );

    let config = match loaded.and_then(|config| config.validate().map(|_| config)) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Service configuration is invalid; aborting");
            std::process::exit(exit_code(&ServiceError::Configuration(e)));
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Hookwarden service");

    if let Err(e) = run(config).await {
        error!(error = %e, "Service stopped with error");
        std::process::exit(exit_code(&e));
    }

    Ok(())
}

/// Build every component from `config` and serve until shutdown.
async fn run(config: ServiceConfig) -> Result<(), ServiceError> {
    let metrics = ServiceMetrics::new()?;

    let ledger = build_ledger(&config).await?;

    let handlers = forward::build_handler_registry(&config.forwarding).map_err(|e| {
        ServiceError::Configuration(ConfigError::Invalid {
            message: e.to_string(),
        })
    })?;

    let breakers = Arc::new(CircuitBreakerRegistry::with_metrics(
        config.circuit_breaker.to_config(),
        metrics.clone(),
    ));

    let dispatcher = Arc::new(
        EventDispatcher::new(ledger, handlers)
            .with_retry_config(config.retry.to_config())
            .with_breakers(breakers)
            .with_metrics(metrics.clone()),
    );

    info!(
        retry_preset = ?config.retry.preset,
        ledger_backend = ?config.ledger.backend,
        forwarding_rules = config.forwarding.len(),
        "Dispatcher ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(true);
    });

    let sweeper_task = if config.sweeper.enabled {
        let sweeper = Sweeper::new(
            dispatcher.clone(),
            &config.sweeper,
            config.ledger.retention(),
        );
        Some(sweeper.spawn(shutdown_rx.clone()))
    } else {
        info!("Sweeper disabled");
        None
    };

    let mut server_shutdown = shutdown_rx;
    let state = AppState::new(config, dispatcher, metrics);
    let result = start_server(state, async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await;
    })
    .await;

    // Stop the sweeper whether the server exited cleanly or not.
    let _ = shutdown_tx.send(true);
    if let Some(task) = sweeper_task {
        if let Err(e) = task.await.context("sweeper task panicked") {
            error!(error = %e, "Sweeper did not stop cleanly");
        }
    }

    result
}

async fn build_ledger(config: &ServiceConfig) -> Result<Arc<dyn EventLedger>, ServiceError> {
    let max_retries = config.ledger.max_retries;

    let ledger: Arc<dyn EventLedger> = match config.ledger.backend {
        LedgerBackend::Memory => {
            info!("Using in-memory ledger; events are lost on restart");
            Arc::new(InMemoryEventLedger::with_max_retries(max_retries))
        }
        LedgerBackend::Filesystem => {
            let ledger =
                FilesystemEventLedger::with_max_retries(config.ledger.path.clone(), max_retries)
                    .await
                    .map_err(|e| {
                        ServiceError::Configuration(ConfigError::Invalid {
                            message: format!(
                                "cannot open ledger at {}: {}",
                                config.ledger.path.display(),
                                e
                            ),
                        })
                    })?;
            info!(path = %config.ledger.path.display(), "Using filesystem ledger");
            Arc::new(ledger)
        }
    };

    Ok(ledger)
}

/// Load configuration from, in increasing precedence:
///
/// 1. `/etc/hookwarden/service.{yaml,toml,json}`
/// 2. `./config/service.{yaml,toml,json}`
/// 3. The file named by `HOOKWARDEN_CONFIG_FILE` (must exist when set)
/// 4. `HW__`-prefixed environment variables, e.g. `HW__SERVER__PORT=9090`
///
/// Absent files are fine since every section has defaults. A malformed file
/// or an uncoercible variable is an error.
fn load_config() -> Result<ServiceConfig, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name("/etc/hookwarden/service").required(false))
        .add_source(config::File::with_name("config/service").required(false));

    if let Ok(explicit_path) = std::env::var(CONFIG_FILE_ENV) {
        if !explicit_path.is_empty() {
            builder = builder.add_source(config::File::with_name(&explicit_path).required(true));
        }
    }

    builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        )
        .build()
        .and_then(|settings| settings.try_deserialize())
        .map_err(|e| ConfigError::Load {
            message: e.to_string(),
        })
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn exit_code(error: &ServiceError) -> i32 {
    match error {
        ServiceError::BindFailed { .. } => 1,
        ServiceError::ServerFailed { .. } | ServiceError::Metrics(_) => 2,
        ServiceError::Configuration(_) => 3,
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
