//! Request definitions
//!
//! Represents messages from clients.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Command Names
// =============================================================================

pub const CMD_READ_KEY: &str = "read-key";
pub const CMD_READ_BULK: &str = "read-bulk";
pub const CMD_READ_PREFIX: &str = "read-prefix";
pub const CMD_WRITE_KEY: &str = "write-key";
pub const CMD_WRITE_BULK: &str = "write-bulk";
pub const CMD_SUBSCRIBE_KEY: &str = "subscribe-key";
pub const CMD_UNSUBSCRIBE_KEY: &str = "unsubscribe-key";
pub const CMD_SUBSCRIBE_PREFIX: &str = "subscribe-prefix";
pub const CMD_UNSUBSCRIBE_PREFIX: &str = "unsubscribe-prefix";
pub const CMD_PROTO_VERSION: &str = "proto-version";
pub const CMD_LIST_KEYS: &str = "list-keys";

/// Every command the server understands
pub const COMMAND_NAMES: [&str; 11] = [
    CMD_READ_KEY,
    CMD_READ_BULK,
    CMD_READ_PREFIX,
    CMD_WRITE_KEY,
    CMD_WRITE_BULK,
    CMD_SUBSCRIBE_KEY,
    CMD_UNSUBSCRIBE_KEY,
    CMD_SUBSCRIBE_PREFIX,
    CMD_UNSUBSCRIBE_PREFIX,
    CMD_PROTO_VERSION,
    CMD_LIST_KEYS,
];

/// Protocol version returned by `proto-version`; bump on any message shape change
pub const PROTO_VERSION: u32 = 1;

// =============================================================================
// Messages
// =============================================================================

/// First frame of every connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientHello {
    /// Prefix applied to every key this client uses
    #[serde(default)]
    pub namespace: String,
}

/// A client request
///
/// `data` is loosely typed; each handler validates the fields it needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Map<String, Value>,

    #[serde(rename = "requestID", default)]
    pub request_id: String,
}

impl Request {
    /// Build a request
    pub fn new(command: impl Into<String>, data: Map<String, Value>, request_id: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            data,
            request_id: request_id.into(),
        }
    }

    /// A field of `data`, if present
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// A string field of `data`; `None` if absent or not a string
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Map<String, Value>>::deserialize(deserializer).map(Option::unwrap_or_default)
}
