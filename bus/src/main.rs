//! Conveyor redelivery buffer - Main entry point.
//!
//! This binary runs the delayed-event redelivery daemon with:
//! - Structured JSON logging for production
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//! - Background counter-window sweeping
//!
//! # Configuration
//!
//! See [`conveyor_bus::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! CONVEYOR_REDELIVERY_COOLDOWN_SECS=60 \
//! RUST_LOG=info \
//! cargo run --release --bin conveyor-buffer
//! ```

use std::process::ExitCode;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use conveyor_bus::config::Config;
use conveyor_bus::context::BusContext;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  CONVEYOR_RATE_LIMIT               - Events per window (default: 1000)");
            eprintln!("  CONVEYOR_RATE_WINDOW_SECS         - Window length (default: 60)");
            eprintln!("  CONVEYOR_REDELIVERY_COOLDOWN_SECS - Hold time (default: 60)");
            eprintln!("  CONVEYOR_CHANNEL_CAPACITY         - Subscription buffer (default: 1024)");
            eprintln!("  CONVEYOR_COUNTER_SWEEP_SECS       - Sweep interval (default: 30)");
            eprintln!("  RUST_LOG                          - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    info!(
        cooldown_secs = config.redelivery_cooldown.as_secs(),
        rate_limit = config.rate_limit,
        rate_window_secs = config.rate_window.as_secs(),
        "Conveyor redelivery buffer starting"
    );

    let context = BusContext::in_memory(config);
    let buffer = context.redelivery_buffer();

    let buffer_handle = tokio::spawn(async move { buffer.run().await });
    info!("Redelivery buffer ready");

    shutdown_signal().await;
    context.shutdown();

    match buffer_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(error = %err, "Redelivery buffer error");
            return ExitCode::from(1);
        }
        Err(err) => {
            error!(error = %err, "Redelivery buffer task panicked");
            return ExitCode::from(1);
        }
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

/// Initialize structured logging with tracing.
///
/// Configures JSON-formatted output for production use with:
/// - Environment-based log level filtering via RUST_LOG
/// - Default log level of `info`
/// - Target and level information
fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Creates a future that resolves when a shutdown signal is received.
///
/// Listens for:
/// - SIGTERM (container orchestrator shutdown)
/// - SIGINT (Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
