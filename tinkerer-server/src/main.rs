//! tinkerer-server binary entry point.
//!
//! ```bash
//! tinkerer-server --config tinkerer.toml
//! RUST_LOG=debug tinkerer-server
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tinkerer_server::config::Config;
use tinkerer_server::heartbeat::spawn_heartbeat_task;
use tinkerer_server::http;
use tinkerer_server::server::ControlPlane;
use tinkerer_server::sweep::spawn_sweep_task;

/// Control plane for remote test-infrastructure agents.
#[derive(Parser, Debug)]
#[command(name = "tinkerer-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "tinkerer.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("loading configuration from {}", cli.config.display()))?
    } else {
        tracing::info!(path = %cli.config.display(), "no config file found, using defaults");
        Config::default()
    };

    http::health::init_start_time();
    let bind_address = config.server.bind_address.clone();
    let plane = Arc::new(ControlPlane::new(config));

    spawn_heartbeat_task(plane.clone());
    spawn_sweep_task(plane.clone());

    let router = http::build_router(plane);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;
    tracing::info!(%bind_address, "control plane listening");
    axum::serve(listener, router).await?;
    Ok(())
}
