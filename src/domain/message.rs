//! The one message shape in the system: immutable once created.

use serde::{Deserialize, Serialize};

use super::Username;

/// A single chat message, room or direct. Server-assigned `timestamp` and
/// `author` make it immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub text_message: String,
    /// Milliseconds since epoch, assigned by the server.
    pub timestamp: i64,
    pub author: String,
}

impl Message {
    pub fn new(author: &Username, text_message: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            text_message: text_message.into(),
            timestamp: timestamp_ms,
            author: author.as_str().to_string(),
        }
    }
}

/// What a client sends when composing a new message: only the text.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInput {
    pub text_message: String,
}
</content>
