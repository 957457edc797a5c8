//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names.
//! Document values are carried verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving `changed` messages for a document. The server answers
    /// with the current document.
    Subscribe {
        collection: String,
        key: String,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Stop receiving changes for a document.
    Unsubscribe {
        collection: String,
        key: String,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Read a document once.
    Get {
        collection: String,
        key: String,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Replace a document. A missing or null value deletes it.
    Put {
        collection: String,
        key: String,
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current state of a document, in reply to `get` or `subscribe`.
    Document {
        collection: String,
        key: String,
        value: Option<Value>,
        /// 0 when the document was never written.
        revision: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Reply to `put` and `unsubscribe`.
    Ack {
        /// Revision produced by a `put`. Absent when nothing changed.
        #[serde(skip_serializing_if = "Option::is_none")]
        revision: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// A subscribed document changed. Sent to every subscriber, the writer
    /// included.
    Changed {
        collection: String,
        key: String,
        value: Option<Value>,
        revision: u64,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }
}
