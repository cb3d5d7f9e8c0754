//! Chat data model shared by the adapter, session, and view layers.

use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;

// =============================================================================
// MESSAGE
// =============================================================================

/// Server-generated row identifier. Tables may key on `bigint` or `uuid`,
/// so both shapes are accepted and compared as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Int(i64),
    Text(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// A single row of the `messages` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Server timestamp; display order follows it.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Insert payload. `id` is always server-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    pub user: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

// =============================================================================
// SESSION STATE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    #[default]
    Connecting,
    Ready,
    Error,
}

/// Observable state of one chat session.
///
/// `Ready` never carries an error and `Error` always does; the session
/// state machine is the only writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub status: ChatStatus,
    pub messages: Vec<ChatMessage>,
    pub error: Option<String>,
}

impl SessionState {
    #[must_use]
    pub fn connecting() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self { status: ChatStatus::Error, messages: Vec::new(), error: Some(message.into()) }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == ChatStatus::Ready
    }
}
