use std::process::ExitCode;

use clap::Parser;
use patchflow_worker::app::{self, EXIT_INVALID_INPUT};
use patchflow_worker::cli::Cli;
use patchflow_worker::config::WorkerConfig;
use patchflow_worker::telemetry;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(EXIT_INVALID_INPUT);
        }
    };

    telemetry::init_tracing(config.log_format);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "patchflow-worker starting");

    match app::execute(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!(error = %message, "patchflow-worker failed");
            ExitCode::FAILURE
        }
    }
}
