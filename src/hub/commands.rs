//! Command table and handlers
//!
//! The table is built once per hub and never mutated. Handlers validate every
//! field they use, translate keys into the caller's namespace on the way in
//! and back out of it on the way out, and return a payload or a
//! [`CommandError`]; the hub turns either into the response.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::protocol::{
    Request, CMD_LIST_KEYS, CMD_PROTO_VERSION, CMD_READ_BULK, CMD_READ_KEY, CMD_READ_PREFIX,
    CMD_SUBSCRIBE_KEY, CMD_SUBSCRIBE_PREFIX, CMD_UNSUBSCRIBE_KEY, CMD_UNSUBSCRIBE_PREFIX,
    CMD_WRITE_BULK, CMD_WRITE_KEY, PROTO_VERSION,
};

use super::error::{CommandError, CommandResult};
use super::session::SessionRef;
use super::Hub;

/// Signature shared by every command handler
pub type CommandHandler = fn(&Hub, &SessionRef, &Request) -> CommandResult;

/// Immutable command name → handler mapping
pub struct CommandTable {
    handlers: HashMap<&'static str, CommandHandler>,
}

impl CommandTable {
    /// The full built-in command set
    pub fn builtin() -> Self {
        let entries: [(&'static str, CommandHandler); 11] = [
            (CMD_READ_KEY, cmd_read_key),
            (CMD_READ_BULK, cmd_read_bulk),
            (CMD_READ_PREFIX, cmd_read_prefix),
            (CMD_WRITE_KEY, cmd_write_key),
            (CMD_WRITE_BULK, cmd_write_bulk),
            (CMD_SUBSCRIBE_KEY, cmd_subscribe_key),
            (CMD_UNSUBSCRIBE_KEY, cmd_unsubscribe_key),
            (CMD_SUBSCRIBE_PREFIX, cmd_subscribe_prefix),
            (CMD_UNSUBSCRIBE_PREFIX, cmd_unsubscribe_prefix),
            (CMD_PROTO_VERSION, cmd_proto_version),
            (CMD_LIST_KEYS, cmd_list_keys),
        ];
        Self {
            handlers: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<CommandHandler> {
        self.handlers.get(name).copied()
    }

    /// Registered command names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

// =============================================================================
// Field & Namespace Helpers
// =============================================================================

fn required_str<'r>(request: &'r Request, name: &'static str) -> Result<&'r str, CommandError> {
    request.str_field(name).ok_or(CommandError::MissingParam(name))
}

/// Translate a client key into the shared key space
fn namespaced(session: &SessionRef, key: &str) -> Vec<u8> {
    let namespace = session.identify().namespace.as_bytes();
    let mut real = Vec::with_capacity(namespace.len() + key.len());
    real.extend_from_slice(namespace);
    real.extend_from_slice(key.as_bytes());
    real
}

/// Strip `prefix` from a stored key and render the rest for the client
fn relative(key: &[u8], prefix: &[u8]) -> String {
    let rest = key.strip_prefix(prefix).unwrap_or(key);
    String::from_utf8_lossy(rest).into_owned()
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

fn client_uid(session: &SessionRef) -> &str {
    &session.identify().uid
}

// =============================================================================
// Read Handlers
// =============================================================================

fn cmd_read_key(hub: &Hub, session: &SessionRef, request: &Request) -> CommandResult {
    let key = required_str(request, "key")?;
    let real_key = namespaced(session, key);

    let value = hub.store().get(&real_key)?;
    tracing::debug!(
        client = %client_uid(session),
        key = %text(&real_key),
        found = value.is_some(),
        "get key"
    );

    Ok(Value::String(value.map(|v| text(&v)).unwrap_or_default()))
}

fn cmd_read_bulk(hub: &Hub, session: &SessionRef, request: &Request) -> CommandResult {
    let entries = request
        .field("keys")
        .and_then(Value::as_array)
        .ok_or(CommandError::MissingParam("keys"))?;

    let keys = entries
        .iter()
        .map(|entry| entry.as_str().ok_or(CommandError::MissingParam("keys")))
        .collect::<Result<Vec<&str>, _>>()?;
    let real_keys: Vec<Vec<u8>> = keys.iter().map(|key| namespaced(session, key)).collect();

    let values = hub.store().get_many(&real_keys)?;

    let mut out = Map::new();
    for (key, value) in keys.iter().zip(values) {
        let value = value.map(|v| text(&v)).unwrap_or_default();
        out.insert((*key).to_string(), Value::String(value));
    }

    tracing::debug!(client = %client_uid(session), count = keys.len(), "get multi key");
    Ok(Value::Object(out))
}

fn cmd_read_prefix(hub: &Hub, session: &SessionRef, request: &Request) -> CommandResult {
    let prefix = required_str(request, "prefix")?;
    let real_prefix = namespaced(session, prefix);

    let entries = hub.store().scan_prefix(&real_prefix)?;

    let mut out = Map::new();
    for (key, value) in &entries {
        out.insert(relative(key, &real_prefix), Value::String(text(value)));
    }

    tracing::debug!(
        client = %client_uid(session),
        prefix = %prefix,
        count = entries.len(),
        "get all (prefix)"
    );
    Ok(Value::Object(out))
}

fn cmd_list_keys(hub: &Hub, session: &SessionRef, request: &Request) -> CommandResult {
    let prefix = match request.field("prefix") {
        None | Some(Value::Null) => "",
        Some(Value::String(prefix)) => prefix.as_str(),
        Some(_) => return Err(CommandError::MissingParam("prefix")),
    };
    let namespace = session.identify().namespace.as_bytes();
    let real_prefix = namespaced(session, prefix);

    let keys: Vec<Value> = hub
        .store()
        .list_keys(&real_prefix)?
        .iter()
        .map(|key| Value::String(relative(key, namespace)))
        .collect();

    tracing::debug!(
        client = %client_uid(session),
        prefix = %prefix,
        count = keys.len(),
        "list keys"
    );
    Ok(Value::Array(keys))
}

fn cmd_proto_version(_hub: &Hub, _session: &SessionRef, _request: &Request) -> CommandResult {
    Ok(Value::from(PROTO_VERSION))
}

// =============================================================================
// Write Handlers
// =============================================================================

fn cmd_write_key(hub: &Hub, session: &SessionRef, request: &Request) -> CommandResult {
    let key = required_str(request, "key")?;
    let data = required_str(request, "data")?;
    let real_key = namespaced(session, key);

    tracing::debug!(client = %client_uid(session), key = %text(&real_key), "modified key");
    hub.commit(vec![(real_key, data.as_bytes().to_vec())])?;
    Ok(Value::Null)
}

fn cmd_write_bulk(hub: &Hub, session: &SessionRef, request: &Request) -> CommandResult {
    // Validate everything before writing anything
    let mut writes = Vec::with_capacity(request.data.len());
    for (key, value) in &request.data {
        let value = value
            .as_str()
            .ok_or_else(|| CommandError::InvalidFormat(format!("invalid value for key \"{}\"", key)))?;
        writes.push((namespaced(session, key), value.as_bytes().to_vec()));
    }

    tracing::debug!(client = %client_uid(session), count = writes.len(), "bulk modify keys");
    hub.commit(writes)?;
    Ok(Value::Null)
}

// =============================================================================
// Subscription Handlers
// =============================================================================

fn cmd_subscribe_key(hub: &Hub, session: &SessionRef, request: &Request) -> CommandResult {
    let key = required_str(request, "key")?;
    let real_key = namespaced(session, key);

    let added = hub.registry().subscribe_key(client_uid(session), &real_key)?;
    tracing::debug!(client = %client_uid(session), key = %text(&real_key), added, "subscribed to key");
    Ok(Value::Null)
}

fn cmd_unsubscribe_key(hub: &Hub, session: &SessionRef, request: &Request) -> CommandResult {
    let key = required_str(request, "key")?;
    let real_key = namespaced(session, key);

    let removed = hub.registry().unsubscribe_key(client_uid(session), &real_key);
    tracing::debug!(client = %client_uid(session), key = %text(&real_key), removed, "unsubscribed from key");
    Ok(Value::Null)
}

fn cmd_subscribe_prefix(hub: &Hub, session: &SessionRef, request: &Request) -> CommandResult {
    let prefix = required_str(request, "prefix")?;
    let real_prefix = namespaced(session, prefix);

    let added = hub.registry().subscribe_prefix(client_uid(session), &real_prefix)?;
    tracing::debug!(client = %client_uid(session), prefix = %text(&real_prefix), added, "subscribed to prefix");
    Ok(Value::Null)
}

fn cmd_unsubscribe_prefix(hub: &Hub, session: &SessionRef, request: &Request) -> CommandResult {
    let prefix = required_str(request, "prefix")?;
    let real_prefix = namespaced(session, prefix);

    let removed = hub.registry().unsubscribe_prefix(client_uid(session), &real_prefix);
    tracing::debug!(client = %client_uid(session), prefix = %text(&real_prefix), removed, "unsubscribed from prefix");
    Ok(Value::Null)
}
