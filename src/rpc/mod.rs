//! JSON-RPC 2.0 host protocol over newline-delimited JSON.
//!
//! | Method                | Params                                      | Result                          |
//! |-----------------------|---------------------------------------------|---------------------------------|
//! | `initialize`          | –                                           | capability descriptor           |
//! | `authenticate`        | `credential`                                | `{ authenticated }`             |
//! | `session/new`         | `workingDirectory?`, `openFiles?`           | session descriptor              |
//! | `session/prompt`      | `sessionId`, `messages[{ role?, content }]` | `{ sessionId, queued }`         |
//! | `session/cancel`      | `sessionId`                                 | `{ cancelled }`                 |
//! | `session/remove`      | `sessionId`                                 | `{ removed }`                   |
//! | `permission/response` | `requestId`, `option`                       | `{ accepted }`                  |
//!
//! Outbound notifications are `session/update` and `permission/request`
//! (see [`crate::models::notification::Notification::to_json_rpc`]).

pub mod server;

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::operation::PermissionOption;
use crate::models::session::Session;
use crate::AppError;

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Inbound JSON-RPC envelope. Requests carry an `id`; notifications do not.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// Protocol version; expected to be `"2.0"`.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Correlation id echoed in the response.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthenticateParams {
    pub credential: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewSessionParams {
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub open_files: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptMessage {
    #[serde(default)]
    pub role: Option<String>,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptParams {
    pub session_id: String,
    pub messages: Vec<PromptMessage>,
}

impl PromptParams {
    /// Text sent to the agent: user-authored messages joined by newlines.
    pub(crate) fn text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| matches!(m.role.as_deref(), None | Some("user")))
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionParams {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PermissionResponseParams {
    pub request_id: String,
    pub option: PermissionOption,
}

/// Build a success response.
#[must_use]
pub fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Build an error response from an [`AppError`].
#[must_use]
pub fn failure(id: Value, err: &AppError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": err.rpc_code(),
            "message": err.to_string(),
            "data": {
                "kind": err.code(),
                "remediation": err.remediation(),
            },
        },
    })
}

/// Build a "method not found" error response.
#[must_use]
pub fn method_not_found(id: Value, method: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("unknown method '{method}'"),
            "data": { "kind": "method_not_found", "remediation": null },
        },
    })
}

/// Session descriptor returned from `session/new`.
#[must_use]
pub fn session_descriptor(session: &Session) -> Value {
    json!({
        "sessionId": session.id,
        "workingDirectory": session.working_directory,
        "openFiles": session.open_files,
        "state": session.state,
        "createdAt": session.created_at,
    })
}
