use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratelimiter::config::RateLimiterConfig;
use ratelimiter::http::HttpServer;
use ratelimiter::ratelimit::RateLimiter;
use ratelimiter::storage;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "ratelimiter")]
#[command(about = "Per-second rate limiter keyed by API token or client IP")]
struct Args {
    /// Configuration file, `KEY=VALUE` lines unless the extension says otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the port the HTTP listener binds to
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting rate limiter");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // An explicit --config must exist; the default .env is optional
    let mut config = match &args.config {
        Some(path) => RateLimiterConfig::load(path, true),
        None => RateLimiterConfig::load(&PathBuf::from(".env"), false),
    }
    .context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.web_server_port = port.to_string();
    }

    let port = config.listen_port()?;
    info!(
        port = port,
        backend = ?config.storage_backend,
        default_limit_by_ip = config.default_limit_by_ip,
        default_limit_by_token = config.default_limit_by_token,
        block_time_in_seconds = config.block_time_in_seconds,
        "Configuration loaded"
    );

    let storage = storage::open(&config)
        .await
        .with_context(|| format!("failed to open {:?} counter store", config.storage_backend))?;

    let rate_limiter = Arc::new(RateLimiter::from_config(storage, &config));
    info!("Rate limiter initialized");

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server =
        HttpServer::new(addr, rate_limiter).with_request_timeout(config.request_timeout());

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Rate limiter stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
