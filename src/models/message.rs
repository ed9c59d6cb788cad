//! Conversation history entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a history entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Text submitted by the host on behalf of the user.
    User,
    /// Text produced by the wrapped agent.
    Agent,
}

/// One entry in a session's in-memory history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Message {
    /// Who produced the content.
    pub role: Role,
    /// Message body.
    pub content: String,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Construct a message stamped with the current time.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}
