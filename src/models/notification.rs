//! Outbound notifications toward the host.

use serde_json::{json, Value};

use crate::models::event::ParseEvent;
use crate::models::operation::{Operation, PermissionOption, RiskLevel};

/// A notification produced for the host protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Classifier-derived or lifecycle content for one session.
    SessionUpdate {
        /// Session the update belongs to.
        session_id: String,
        /// Update type (e.g. `code_block_append`).
        kind: String,
        /// Type-specific body.
        payload: Value,
    },
    /// A risky operation awaits the host's decision.
    PermissionRequest {
        /// Correlation identifier echoed back in `permission/response`.
        request_id: String,
        /// Session whose agent wants to perform the operation.
        session_id: String,
        /// The operation under review.
        operation: Operation,
        /// Assessed risk tier.
        risk_level: RiskLevel,
        /// Options the host may choose from.
        options: Vec<PermissionOption>,
    },
}

impl Notification {
    /// Wrap a classifier event for `session_id`.
    #[must_use]
    pub fn from_event(session_id: &str, event: &ParseEvent) -> Self {
        Self::SessionUpdate {
            session_id: session_id.to_owned(),
            kind: event.kind().to_owned(),
            payload: event.payload(),
        }
    }

    /// Build a lifecycle update (e.g. `restarting`, `errored`).
    #[must_use]
    pub fn lifecycle(session_id: &str, kind: &str, payload: Value) -> Self {
        Self::SessionUpdate {
            session_id: session_id.to_owned(),
            kind: kind.to_owned(),
            payload,
        }
    }

    /// Session the notification is tagged with.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionUpdate { session_id, .. } | Self::PermissionRequest { session_id, .. } => {
                session_id
            }
        }
    }

    /// Render as a JSON-RPC 2.0 notification object.
    #[must_use]
    pub fn to_json_rpc(&self) -> Value {
        match self {
            Self::SessionUpdate {
                session_id,
                kind,
                payload,
            } => json!({
                "jsonrpc": "2.0",
                "method": "session/update",
                "params": {
                    "sessionId": session_id,
                    "type": kind,
                    "payload": payload,
                }
            }),
            Self::PermissionRequest {
                request_id,
                session_id,
                operation,
                risk_level,
                options,
            } => json!({
                "jsonrpc": "2.0",
                "method": "permission/request",
                "params": {
                    "requestId": request_id,
                    "sessionId": session_id,
                    "operation": operation,
                    "riskLevel": risk_level,
                    "options": options,
                }
            }),
        }
    }
}
