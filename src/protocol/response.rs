//! Server message definitions
//!
//! Represents everything the server sends to clients.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A message from the server, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Handshake acknowledgement
    Hello { uid: String, version: u32 },

    /// Reply to a request, correlated by `requestID`
    Response {
        ok: bool,
        #[serde(rename = "requestID", default)]
        request_id: String,
        #[serde(default)]
        data: Value,
    },

    /// Unsolicited change notification (namespace-relative key)
    Push { key: String, value: String },
}

/// Payload of a failed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl ServerMessage {
    /// Create a successful response
    pub fn ok(request_id: impl Into<String>, data: Value) -> Self {
        ServerMessage::Response {
            ok: true,
            request_id: request_id.into(),
            data,
        }
    }

    /// Create a failed response
    pub fn error(request_id: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Response {
            ok: false,
            request_id: request_id.into(),
            data: json!({ "error": code, "message": message.into() }),
        }
    }

    /// Create a push notification
    pub fn push(key: impl Into<String>, value: impl Into<String>) -> Self {
        ServerMessage::Push {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The error body of a failed response
    pub fn error_body(&self) -> Option<ErrorBody> {
        match self {
            ServerMessage::Response { ok: false, data, .. } => {
                serde_json::from_value(data.clone()).ok()
            }
            _ => None,
        }
    }
}
