//! PDF conversion service library.
//!
//! Clients connect over WebSocket, authenticate with a bearer token, upload a
//! document and receive the PDF produced by headless LibreOffice.
//!
//! ## Module Overview
//!
//! - `command`: command registry and the `convert` handler driving each job
//! - `config`: JSON configuration with defaults and validation
//! - `converter`: export filter table and the LibreOffice subprocess
//! - `error`: per-job error taxonomy
//! - `gate`: bearer-token check at handshake time
//! - `job`: job model and state transitions
//! - `locator`: cached discovery of the `soffice` binary
//! - `server`: axum router and connection loop
//! - `telemetry`: OpenTelemetry integration and structured logging
//! - `workspace`: per-job scratch directories
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use pdf_convert::{config::Config, server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::with_workdir("/var/lib/pdf-convert");
//!     let state = server::AppState::new(config);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:5000").await?;
//!     axum::serve(listener, server::router(state)).await?;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod config;
pub mod converter;
pub mod error;
pub mod gate;
pub mod job;
pub mod locator;
pub mod server;
pub mod telemetry;
pub mod workspace;
