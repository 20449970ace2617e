#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # bhole
//!
//! Reverse-tunnel relay. Agents behind NAT dial out over WebSocket and
//! register an endpoint name; external HTTP requests for that endpoint are
//! forwarded over the agent's connection and answered with its response.
//!
//! ## Subcommands
//!
//! - `bhole serve` (default) runs the relay
//!
//! ## API surface
//!
//! | Method | Path / Host                   | Description                     |
//! |--------|-------------------------------|---------------------------------|
//! | GET    | `/api/health`                 | Liveness probe                  |
//! | GET    | `/api/tunnels`                | Registered endpoints            |
//! | GET    | `/tunnel` or `connect_host`   | Agent WebSocket registration    |
//! | any    | anything else                 | Forwarded to the endpoint agent |
//!
//! The endpoint is taken from `X-Blackhole-Endpoint`, else the first label
//! of the Host header.

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use bhole::{routing, Config, RelayState};

/// Reverse-tunnel relay for privately hosted HTTP endpoints.
#[derive(Parser)]
#[command(name = "bhole", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = match cli.command {
        Some(Commands::Serve { config }) => config,
        None => None,
    };
    run_server(config_path.as_deref()).await;
}

async fn run_server(config_path: Option<&str>) {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bhole: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("bhole v{} starting", config.deploy.version);
    info!("Listening on {}", config.server.listen);
    info!(
        connect_host = %config.server.connect_host,
        api_host = %config.server.api_host,
        "Host routing configured"
    );

    if config.auth_token().is_none() {
        warn!("No auth token configured, any agent may register: set BHOLE_AUTH_TOKEN");
    }

    let state = RelayState::new(config);
    let app = routing::router(state.clone());

    let listener = match TcpListener::bind(&state.config.server.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "Failed to bind {}", state.config.server.listen);
            std::process::exit(1);
        }
    };

    info!("Relay ready");

    // Draining on the signal fails waiting forwards so graceful shutdown
    // does not wait on agents.
    let registry = state.registry.clone();
    let shutdown = async move {
        shutdown_signal().await;
        info!("Shutting down...");
        let drained = registry.drain();
        info!(tunnels = drained, "Terminated agent tunnels");
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %e, "Server error");
    }

    // Agents that registered while connections were winding down.
    state.registry.drain();
    info!("Goodbye");
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM, waiting for SIGINT only");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
