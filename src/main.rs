//! Therapy Bot server
//!
//! Entry point: loads configuration, initializes logging and serves the chat
//! application until a shutdown signal arrives.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use mimalloc::MiMalloc;
use tracing::info;

use therapy_bot::config::{AppConfig, Cli};
use therapy_bot::{server, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env (if present) before clap reads env-backed flags
    let _ = dotenv();

    let cli = Cli::parse();
    telemetry::init();

    let config = match AppConfig::from_cli(&cli) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            tracing::error!(name: "config.invalid", error = %e, "Configuration error");
            return ExitCode::FAILURE;
        }
    };

    info!(
        name: "config.loaded",
        host = %config.server.host,
        port = config.server.port,
        jwt_required = config.security.jwt_required,
        rate_limit_enabled = config.resilience.rate_limit_enabled,
        "Configuration loaded"
    );

    if cli.check_config {
        config.log_session_diagnostics();
        return ExitCode::SUCCESS;
    }

    match server::start_server(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(name: "server.failed", error = %e, "Server exited with an error");
            ExitCode::FAILURE
        }
    }
}
