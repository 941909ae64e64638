//! PDF Conversion Service
//!
//! Accepts office documents over WebSocket and converts them to PDF with
//! headless LibreOffice.
//!
//! ## Configuration
//!
//! - `--config`/`-c`: JSON configuration file (default: `./config.json`)
//! - `--port`/`-p`: listening port (default: `port` key, then 5000)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector endpoint
//! - `RUST_LOG`: log filter (default: `pdf_convert=info,tower_http=info`)

use anyhow::{Context, Result};
use clap::Parser;
use pdf_convert::config::Config;
use pdf_convert::locator::LocateBinary;
use pdf_convert::{server, telemetry};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "pdf-convert", version, about = "Convert office documents to PDF over WebSocket")]
struct Cli {
    /// Set configuration file
    #[arg(short, long, value_name = "FILENAME")]
    config: Option<PathBuf>,

    /// Set server port to listen
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_convert=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = telemetry::init_telemetry() {
        warn!("Failed to initialize telemetry: {}", e);
    }

    let root_dir = std::env::current_dir().context("Failed to resolve working directory")?;
    let mut config = Config::load(cli.config.as_deref(), &root_dir)?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    info!(
        "Configuration: workdir={}, endpoint={}, auth={}, timeout={}s",
        config.workdir.display(),
        config.endpoint_path(),
        config.token.is_some(),
        config.timeout.as_secs()
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = server::AppState::new(config);

    // Discover LibreOffice up front so the first job does not pay for it
    if state.locator.locate().is_none() {
        warn!("LibreOffice not found; convert requests will fail until it is installed");
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Application ready on port {}...", addr.port());

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    telemetry::shutdown_telemetry();
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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

    info!("Received shutdown signal");
}
