//! Gatehouse: a reverse-proxy gateway.
//!
//! This is the application entry point. It initializes tracing, loads the JSON
//! configuration, builds the listeners and serves until SIGTERM/SIGINT or a
//! listener failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatehouse::config::{DEFAULT_LOG_FILTER, QUIET_LOG_FILTER};
use gatehouse::http::termination_signal;
use gatehouse::{serve_gateway, GatewayConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Gatehouse: route, authenticate and forward HTTP requests
#[derive(Parser, Debug)]
#[command(name = "gatehouse", version, about)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, alias = "config_path")]
    config_path: PathBuf,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// Log level filter (e.g., "gatehouse=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(args: &Args) {
    // Priority: quiet > CLI > env > default
    let log_filter = if args.quiet {
        QUIET_LOG_FILTER.to_string()
    } else {
        args.log_level
            .clone()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
    };

    // Warnings and errors go to stderr, everything else to stdout.
    let writer = std::io::stderr
        .with_max_level(Level::WARN)
        .or_else(std::io::stdout);

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));
    match args.log_format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args);

    // Several providers may be compiled in; pick one for the whole process.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Hi! Gatehouse is starting");

    let config = match GatewayConfig::load(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = %args.config_path.display(), error = %e, "Failed to load the config");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        routes = config.routes.len(),
        tls = config.tls_mode().is_tls(),
        "Loaded configuration"
    );

    match serve_gateway(&config, termination_signal()).await {
        Ok(report) => {
            if report.failures > 0 {
                tracing::warn!(failures = report.failures, "Stopped after listener failures");
            }
            tracing::info!("Goodbye!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to start the gateway");
            ExitCode::FAILURE
        }
    }
}
