//! Client Module
//!
//! A blocking client for the TideKV protocol.
//!
//! Requests are answered in order, but pushes may arrive in between; they are
//! queued and handed out by [`Client::next_push`].
//!
//! Incoming bytes collect in a buffer until a whole frame is present, so a
//! read timeout never discards part of a frame.

use std::collections::{BTreeMap, VecDeque};
use std::io::{BufWriter, ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::BytesMut;
use serde_json::{json, Map, Value};

use crate::error::{Result, TideError};
use crate::protocol::{
    decode_frame, decode_server_message, encode_frame, write_frame, ClientHello, Request,
    ServerMessage, CMD_LIST_KEYS, CMD_PROTO_VERSION, CMD_READ_BULK, CMD_READ_KEY,
    CMD_READ_PREFIX, CMD_SUBSCRIBE_KEY, CMD_SUBSCRIBE_PREFIX, CMD_UNSUBSCRIBE_KEY,
    CMD_UNSUBSCRIBE_PREFIX, CMD_WRITE_BULK, CMD_WRITE_KEY,
};

/// A change notification received by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Push {
    pub key: String,
    pub value: String,
}

const READ_CHUNK: usize = 8 * 1024;

/// Blocking connection to a TideKV server
pub struct Client {
    stream: TcpStream,
    writer: BufWriter<TcpStream>,
    buffer: BytesMut,
    uid: String,
    server_version: u32,
    next_request_id: u64,
    pushes: VecDeque<Push>,
}

impl Client {
    /// Connect and perform the handshake
    pub fn connect<A: ToSocketAddrs>(addr: A, namespace: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;

        let mut client = Self {
            writer: BufWriter::new(stream.try_clone()?),
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            uid: String::new(),
            server_version: 0,
            next_request_id: 1,
            pushes: VecDeque::new(),
        };

        let hello = serde_json::to_vec(&ClientHello {
            namespace: namespace.to_string(),
        })?;
        write_frame(&mut client.writer, &encode_frame(&hello)?)?;

        match client.read_message()? {
            ServerMessage::Hello { uid, version } => {
                client.uid = uid;
                client.server_version = version;
                Ok(client)
            }
            other => Err(TideError::Protocol(format!(
                "expected hello, got {:?}",
                other
            ))),
        }
    }

    /// Session uid assigned by the server
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Protocol version announced in the handshake
    pub fn server_version(&self) -> u32 {
        self.server_version
    }

    /// Send a command and wait for its response payload
    ///
    /// An `ok:false` response becomes [`TideError::Remote`].
    pub fn request(&mut self, command: &str, data: Map<String, Value>) -> Result<Value> {
        let request_id = self.next_request_id.to_string();
        self.next_request_id += 1;

        let request = Request::new(command, data, request_id.clone());
        let payload = serde_json::to_vec(&request)?;
        write_frame(&mut self.writer, &encode_frame(&payload)?)?;

        loop {
            match self.read_message()? {
                ServerMessage::Push { key, value } => self.pushes.push_back(Push { key, value }),
                ServerMessage::Response {
                    ok,
                    request_id: id,
                    data,
                } if id == request_id => {
                    if ok {
                        return Ok(data);
                    }
                    let code = data.get("error").and_then(Value::as_str).unwrap_or("unknown");
                    let message = data.get("message").and_then(Value::as_str).unwrap_or("");
                    return Err(TideError::Remote {
                        code: code.to_string(),
                        message: message.to_string(),
                    });
                }
                other => {
                    tracing::debug!(message = ?other, "ignoring uncorrelated message");
                }
            }
        }
    }

    /// Next push, waiting up to `timeout` (`None` waits forever)
    ///
    /// Returns `Ok(None)` if nothing arrived in time. A frame cut off by the
    /// timeout stays buffered and completes on a later call.
    pub fn next_push(&mut self, timeout: Option<Duration>) -> Result<Option<Push>> {
        if let Some(push) = self.pushes.pop_front() {
            return Ok(Some(push));
        }

        self.stream.set_read_timeout(timeout)?;
        let outcome = loop {
            match self.read_message() {
                Ok(ServerMessage::Push { key, value }) => break Ok(Some(Push { key, value })),
                Ok(other) => {
                    tracing::debug!(message = ?other, "ignoring non-push message");
                }
                Err(TideError::Io(e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    break Ok(None)
                }
                Err(e) => break Err(e),
            }
        };
        self.stream.set_read_timeout(None)?;
        outcome
    }

    fn read_message(&mut self) -> Result<ServerMessage> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(payload) = decode_frame(&mut self.buffer)? {
                return decode_server_message(&payload);
            }

            let n = match self.stream.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Err(TideError::Network("server closed the connection".to_string()));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    // =========================================================================
    // Typed Commands
    // =========================================================================

    pub fn read_key(&mut self, key: &str) -> Result<String> {
        let value = self.request(CMD_READ_KEY, fields(json!({ "key": key })))?;
        as_string(value)
    }

    pub fn read_bulk(&mut self, keys: &[&str]) -> Result<BTreeMap<String, String>> {
        let value = self.request(CMD_READ_BULK, fields(json!({ "keys": keys })))?;
        as_string_map(value)
    }

    pub fn read_prefix(&mut self, prefix: &str) -> Result<BTreeMap<String, String>> {
        let value = self.request(CMD_READ_PREFIX, fields(json!({ "prefix": prefix })))?;
        as_string_map(value)
    }

    pub fn write_key(&mut self, key: &str, value: &str) -> Result<()> {
        self.request(CMD_WRITE_KEY, fields(json!({ "key": key, "data": value })))?;
        Ok(())
    }

    pub fn write_bulk<'a, I>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let data = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        self.request(CMD_WRITE_BULK, data)?;
        Ok(())
    }

    pub fn subscribe_key(&mut self, key: &str) -> Result<()> {
        self.request(CMD_SUBSCRIBE_KEY, fields(json!({ "key": key })))?;
        Ok(())
    }

    pub fn unsubscribe_key(&mut self, key: &str) -> Result<()> {
        self.request(CMD_UNSUBSCRIBE_KEY, fields(json!({ "key": key })))?;
        Ok(())
    }

    pub fn subscribe_prefix(&mut self, prefix: &str) -> Result<()> {
        self.request(CMD_SUBSCRIBE_PREFIX, fields(json!({ "prefix": prefix })))?;
        Ok(())
    }

    pub fn unsubscribe_prefix(&mut self, prefix: &str) -> Result<()> {
        self.request(CMD_UNSUBSCRIBE_PREFIX, fields(json!({ "prefix": prefix })))?;
        Ok(())
    }

    /// Keys in this namespace, optionally restricted to a prefix
    pub fn list_keys(&mut self, prefix: Option<&str>) -> Result<Vec<String>> {
        let data = match prefix {
            Some(prefix) => fields(json!({ "prefix": prefix })),
            None => Map::new(),
        };
        match self.request(CMD_LIST_KEYS, data)? {
            Value::Array(items) => items.into_iter().map(as_string).collect(),
            other => Err(unexpected("array", &other)),
        }
    }

    pub fn proto_version(&mut self) -> Result<u32> {
        let value = self.request(CMD_PROTO_VERSION, Map::new())?;
        value
            .as_u64()
            .map(|v| v as u32)
            .ok_or_else(|| unexpected("integer", &value))
    }
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn as_string(value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(unexpected("string", &other)),
    }
}

fn as_string_map(value: Value) -> Result<BTreeMap<String, String>> {
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| as_string(v).map(|v| (k, v)))
            .collect(),
        other => Err(unexpected("object", &other)),
    }
}

fn unexpected(expected: &str, got: &Value) -> TideError {
    TideError::Protocol(format!("expected {} payload, got {}", expected, got))
}
