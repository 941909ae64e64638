//! Named command handlers bound to authenticated connections.
//!
//! Every handler implements [`Command::consume`]. The [`CommandRegistry`] is
//! built once at startup and shared; each connection gets a
//! [`BoundCommands`] view of it for its lifetime.

pub mod convert;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ErrorBody, JobError};

/// A client session on the transport.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    pub authenticated: bool,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            authenticated: false,
            connected_at: Utc::now(),
        }
    }

    /// Set once, after the gate accepted the handshake.
    pub fn mark_authenticated(&mut self) {
        self.authenticated = true;
    }
}

/// What a handler hands back for one request.
#[derive(Debug)]
pub enum Reply {
    Result(Vec<u8>),
    Error(JobError),
    /// Nothing to do; serialized as an empty object.
    Empty,
}

/// A command handler.
#[async_trait]
pub trait Command: Send + Sync {
    async fn consume(&self, connection: &Connection, data: Value) -> Reply;
}

/// Incoming frame: `{"id": …, "command": "convert", "data": {…}}`.
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Value>,
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

/// Outgoing frame. Exactly one of `result` and `error` is set, or neither.
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Base64-encoded PDF bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn new(id: Option<Value>, reply: Reply) -> Self {
        match reply {
            Reply::Result(bytes) => Self {
                id,
                result: Some(BASE64.encode(bytes)),
                error: None,
            },
            Reply::Error(err) => Self {
                id,
                result: None,
                error: Some(err.to_body()),
            },
            Reply::Empty => Self {
                id,
                ..Default::default()
            },
        }
    }

    pub fn to_json(&self) -> String {
        // Only strings and JSON values are serialized; this cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Name → handler mapping.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<&'static str, Arc<dyn Command>>,
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, handler: Arc<dyn Command>) -> &mut Self {
        self.handlers.insert(name, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.handlers.get(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Binds the handler set to an authenticated connection.
    pub fn bind(self: &Arc<Self>, connection: Connection) -> BoundCommands {
        debug_assert!(connection.authenticated, "binding an unauthenticated connection");
        BoundCommands {
            registry: Arc::clone(self),
            connection,
        }
    }
}

/// Handlers available on one connection.
#[derive(Debug, Clone)]
pub struct BoundCommands {
    registry: Arc<CommandRegistry>,
    connection: Connection,
}

impl BoundCommands {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        let reply = match self.registry.get(&request.command) {
            Some(handler) => {
                debug!(
                    connection_id = %self.connection.id,
                    command = %request.command,
                    "Dispatching command"
                );
                handler.consume(&self.connection, request.data).await
            }
            None => Reply::Error(JobError::UnknownCommand(request.command)),
        };
        Response::new(request.id, reply)
    }

    /// Parses a text frame and dispatches it. Malformed frames get an
    /// `invalid_request` error, echoing the `id` when one can be recovered.
    pub async fn handle_frame(&self, text: &str) -> Response {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => return Response::new(None, Reply::Error(JobError::InvalidRequest(e.to_string()))),
        };
        let id = value.get("id").cloned();
        match serde_json::from_value::<Request>(value) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => Response::new(id, Reply::Error(JobError::InvalidRequest(e.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Command for Echo {
        async fn consume(&self, _connection: &Connection, data: Value) -> Reply {
            match data.as_str() {
                Some(s) => Reply::Result(s.as_bytes().to_vec()),
                None => Reply::Empty,
            }
        }
    }

    fn bound() -> BoundCommands {
        let mut registry = CommandRegistry::new();
        registry.register("echo", Arc::new(Echo));
        let mut connection = Connection::new(Uuid::new_v4());
        connection.mark_authenticated();
        Arc::new(registry).bind(connection)
    }

    #[tokio::test]
    async fn test_dispatch_by_name() {
        let response = bound()
            .handle_frame(r#"{"id": 7, "command": "echo", "data": "hi"}"#)
            .await;
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "id": 7, "result": BASE64.encode("hi") })
        );
    }

    #[tokio::test]
    async fn test_empty_reply_serializes_to_empty_object() {
        let response = bound().handle_frame(r#"{"command": "echo"}"#).await;
        assert_eq!(response.to_json(), "{}");
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let response = bound()
            .handle_frame(r#"{"id": "a", "command": "print"}"#)
            .await;
        assert_eq!(response.id, Some(json!("a")));
        assert_eq!(response.error.unwrap().code, "unknown_command");
    }

    #[tokio::test]
    async fn test_malformed_frames() {
        let response = bound().handle_frame("not json").await;
        assert_eq!(response.error.unwrap().code, "invalid_request");

        let response = bound().handle_frame(r#"{"id": 3}"#).await;
        assert_eq!(response.id, Some(json!(3)));
        assert_eq!(response.error.unwrap().code, "invalid_request");
    }

    #[test]
    fn test_registry_names() {
        let mut registry = CommandRegistry::new();
        registry.register("b", Arc::new(Echo)).register("a", Arc::new(Echo));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.get("a").is_some());
        assert!(registry.get("c").is_none());
    }
}
