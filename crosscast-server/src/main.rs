//! crosscast-server - HTTP delivery surface for the publish pipeline
//!
//! Accepts publish requests (batch and SSE-streamed), drains scheduled
//! posts on webhook, and serves the persisted audit reports.

mod routes;
mod sse;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use libcrosscast::service::CrosscastService;
use libcrosscast::Config;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "crosscast-server")]
#[command(version)]
#[command(about = "HTTP server for multi-destination publish orchestration")]
#[command(long_about = "\
crosscast-server - HTTP server for multi-destination publish orchestration

DESCRIPTION:
    crosscast-server exposes the Crosscast publish pipeline over HTTP:
    a batch endpoint, a streaming endpoint that reports per-step and
    per-destination progress as server-sent events, a webhook that drains
    due scheduled posts, and a read path over the persisted publish
    reports.

USAGE:
    # Run with the default config (~/.config/crosscast/config.toml)
    crosscast-server

    # Run with an explicit config file
    crosscast-server --config ./crosscast.toml

    # Override the bind address
    crosscast-server --bind 0.0.0.0:9000

SIGNALS:
    SIGINT - Graceful shutdown (in-flight publishes run to completion)

CONFIGURATION:
    Configuration file: ~/.config/crosscast/config.toml
    Database location per [database].path (created on first run)

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Bind address (overrides [server].bind)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("CROSSCAST_LOG_LEVEL", "debug");
    }
    libcrosscast::logging::init_default();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {}", e);
            std::process::exit(2);
        }
    };
    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());

    if let Err(e) = run(config, &bind).await {
        error!("server error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> libcrosscast::Result<Config> {
    match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

async fn run(config: Config, bind: &str) -> anyhow::Result<()> {
    let service = Arc::new(CrosscastService::from_config(config).await?);

    // Expired credential entries also drop lazily on read; this just keeps
    // the map from accumulating dead weight between publishes.
    let sweeper = Arc::clone(&service);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let swept = sweeper.sweep_credential_cache();
            if swept > 0 {
                debug!(swept, "credential cache sweep");
            }
        }
    });

    let app = routes::build_router(routes::AppContext { service });

    info!("Starting HTTP server on {}", bind);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("crosscast-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install shutdown handler: {}", e);
        return;
    }
    info!("shutdown signal received");
}
