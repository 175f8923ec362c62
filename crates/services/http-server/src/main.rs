//! diagramd binary entry point
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:8000)
//! cargo run -p diagramd-server
//!
//! # With a configuration file
//! DIAGRAMD_CONFIG=diagramd.toml cargo run -p diagramd-server
//!
//! # With logging
//! RUST_LOG=debug cargo run -p diagramd-server
//! ```
//!
//! # Environment Variables
//!
//! - `DIAGRAMD_CONFIG`: TOML configuration file
//! - `DIAGRAMD_HOST`, `DIAGRAMD_PORT`: bind address
//! - `DIAGRAMD_<RENDERER>_BIN_PATH`: renderer executable (`DOT`, `PLANTUML`, `ERD`, `SVGBOB`)
//! - `RUST_LOG`: Logging filter (default: `info,tower_http=debug`)

use anyhow::{Context, Result};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use diagramd_server::{build_server, Config, CONFIG_PATH_ENV};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting diagramd...");

    // Load configuration
    let config_path = std::env::var(CONFIG_PATH_ENV).ok();
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    tracing::info!(
        bind_address = %config.bind_address(),
        max_concurrent_renders = config.limits.max_concurrent_renders,
        render_timeout_seconds = config.limits.render_timeout_seconds,
        max_source_bytes = config.limits.max_source_bytes,
        "Configuration loaded"
    );

    let server = build_server(&config).context("Invalid configuration")?;
    let listener = server.bind().await?;

    // Run the HTTP server with graceful shutdown on SIGTERM/SIGINT
    server
        .run(listener, async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, initiating graceful shutdown...");
        })
        .await?;

    tracing::info!("diagramd shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
