use clap::Parser;
use metrics_exporter_statsd::StatsdBuilder;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

const METRICS_PREFIX: &str = "csv_relay";

/// Returns the `csv_text` field of a JSON POST to /create-csv as a CSV file.
///
/// All settings come from the environment: PORT, APIKEY, HOST, RUST_LOG,
/// SENTRY_DSN, STATSD_HOST and STATSD_PORT.
#[derive(Parser)]
#[command(version)]
struct Cli {}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
    #[error(transparent)]
    Relay(#[from] relay::errors::RelayError),
}

fn main() -> ExitCode {
    let _cli = Cli::parse();

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("csv-relay: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _sentry = config.common.logging.as_ref().map(init_sentry);
    init_tracing(config.common.logging.is_some());

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "csv-relay stopped");
            ExitCode::FAILURE
        }
    }
}

fn run(config: config::Config) -> Result<(), CliError> {
    if let Some(metrics_config) = &config.common.metrics {
        init_metrics(metrics_config)?;
    }

    tracing::info!(
        host = %config.relay.listener.host,
        port = config.relay.listener.port,
        api_key_configured = config.relay.api_key.is_some(),
        "Starting csv-relay"
    );

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    rt.block_on(async move {
        tokio::select! {
            res = relay::run(config.relay) => res.map_err(CliError::from),
            _ = shutdown_signal() => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
        }
    })
}

fn init_sentry(logging: &config::LoggingConfig) -> sentry::ClientInitGuard {
    sentry::init(sentry::ClientOptions {
        dsn: Some(logging.sentry_dsn.clone()),
        release: sentry::release_name!(),
        ..Default::default()
    })
}

fn init_tracing(with_sentry: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sentry_layer = with_sentry.then(sentry::integrations::tracing::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(sentry_layer)
        .init();
}

fn init_metrics(metrics_config: &config::MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(
        metrics_config.statsd_host.clone(),
        metrics_config.statsd_port,
    )
    .build(Some(METRICS_PREFIX))
    .map_err(|e| CliError::Metrics(e.to_string()))?;

    metrics::set_global_recorder(recorder)
        .map_err(|_| CliError::Metrics("a metrics recorder is already installed".into()))?;
    shared::metrics_defs::describe_all(relay::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %metrics_config.statsd_host,
        port = metrics_config.statsd_port,
        "Sending metrics to StatsD"
    );
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
