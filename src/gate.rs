//! Bearer-token check performed before the WebSocket handshake completes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::warn;

const BEARER_PREFIX: &str = "Bearer ";

/// Connection-level rejection. Never reaches job handling.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid authorization")]
pub struct AuthorizationError;

impl IntoResponse for AuthorizationError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Validates the `Authorization` header against the configured secret.
#[derive(Debug, Clone)]
pub struct ConnectionGate {
    token: Option<String>,
}

impl ConnectionGate {
    /// A gate without a token accepts every connection.
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    pub fn authorize(
        &self,
        connection_id: &str,
        authorization: Option<&str>,
    ) -> Result<(), AuthorizationError> {
        let Some(expected) = &self.token else {
            return Ok(());
        };

        let presented = authorization.map(|header| header.strip_prefix(BEARER_PREFIX).unwrap_or(header));
        if presented == Some(expected.as_str()) {
            return Ok(());
        }

        warn!(connection_id, "Client is using invalid authorization");
        Err(AuthorizationError)
    }
}
