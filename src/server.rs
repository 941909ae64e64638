//! HTTP/WebSocket transport.
//!
//! Clients connect to `<rootPath>/pdf`. The bearer token is checked before the
//! upgrade completes; accepted connections exchange JSON text frames with the
//! command registry. Up to `maxConcurrentJobs` requests on a connection run at
//! once, the rest wait their turn. Replies echo the request `id`.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::command::convert::{self, ConvertCommand};
use crate::command::{BoundCommands, CommandRegistry, Connection};
use crate::config::{Config, CorsConfig, CorsOrigin};
use crate::converter::ConverterInvoker;
use crate::gate::{AuthorizationError, ConnectionGate};
use crate::locator::{ConverterLocator, LocateBinary};
use crate::workspace::WorkspaceManager;

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gate: ConnectionGate,
    pub locator: Arc<dyn LocateBinary>,
    pub registry: Arc<CommandRegistry>,
}

impl AppState {
    /// Builds the gate, locator and command registry from configuration.
    pub fn new(config: Config) -> Self {
        let locator = Arc::new(ConverterLocator::new(config.converter.clone()));
        Self::with_locator(config, locator)
    }

    /// Like [`AppState::new`], with converter discovery supplied by the caller.
    pub fn with_locator(config: Config, locator: Arc<dyn LocateBinary>) -> Self {
        let convert = ConvertCommand::new(
            locator.clone(),
            WorkspaceManager::new(config.workspace_root()),
            ConverterInvoker::new(config.timeout),
        );

        let mut registry = CommandRegistry::new();
        registry.register(convert::COMMAND_NAME, Arc::new(convert));

        Self {
            gate: ConnectionGate::new(config.token.clone()),
            config: Arc::new(config),
            locator,
            registry: Arc::new(registry),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let endpoint = state.config.endpoint_path();
    info!(endpoint = %endpoint, commands = ?state.registry.names(), "Mounting conversion endpoint");

    Router::new()
        .route("/health", get(health_check))
        .route(&endpoint, get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors))
        .with_state(state)
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let origins: Vec<&String> = match &cors.origin {
        CorsOrigin::One(origin) if origin == "*" => return layer.allow_origin(Any),
        CorsOrigin::One(origin) => vec![origin],
        CorsOrigin::Many(origins) => origins.iter().collect(),
    };

    let allowed: Vec<HeaderValue> = origins
        .into_iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// GET `<rootPath>/pdf` — authorize, then upgrade.
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AuthorizationError> {
    let mut connection = Connection::new(Uuid::new_v4());
    let connection_id = connection.id.to_string();

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    state.gate.authorize(&connection_id, authorization)?;
    connection.mark_authenticated();

    info!(connection_id = %connection_id, "Client connected");
    let commands = state.registry.bind(connection);
    let max_jobs = state.config.max_concurrent_jobs;

    Ok(ws
        .max_message_size(state.config.max_upload_size)
        .on_upgrade(move |socket| handle_connection(commands, socket, max_jobs)))
}

/// Runs one established connection until the client goes away.
async fn handle_connection(commands: BoundCommands, socket: WebSocket, max_jobs: usize) {
    let connection_id = commands.connection().id;
    let permits = Arc::new(Semaphore::new(max_jobs));
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut jobs = JoinSet::new();
    loop {
        tokio::select! {
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let commands = commands.clone();
                    let out_tx = out_tx.clone();
                    let permits = Arc::clone(&permits);
                    let text = text.as_str().to_owned();
                    jobs.spawn(async move {
                        // Never closed
                        let Ok(_permit) = permits.acquire_owned().await else {
                            return;
                        };
                        let response = commands.handle_frame(&text).await;
                        let _ = out_tx.send(response.to_json());
                    });
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Binary(_))) => {
                    debug!(connection_id = %connection_id, "Ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                    break;
                }
            },
            Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                if let Err(e) = joined {
                    error!(connection_id = %connection_id, error = %e, "Request task failed");
                }
            }
        }
    }

    // Aborting drops in-flight jobs: converters are killed and their
    // workspaces removed by the guard.
    if !jobs.is_empty() {
        info!(connection_id = %connection_id, in_flight = jobs.len(), "Aborting in-flight jobs");
    }
    jobs.shutdown().await;
    drop(out_tx);
    let _ = writer.await;

    info!(connection_id = %connection_id, "Client disconnected");
}
