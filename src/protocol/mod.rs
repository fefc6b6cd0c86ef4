//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ## Framing
//! ```text
//! ┌──────────┬─────────────────────────────┐
//! │ Len (4)  │   UTF-8 JSON message        │
//! └──────────┴─────────────────────────────┘
//! ```
//! `Len` is big-endian; frames above [`MAX_FRAME_SIZE`] are rejected.
//!
//! ## Session
//! 1. Client sends a hello: `{"namespace": "tenant-a/"}`
//! 2. Server answers `{"type":"hello","uid":"…","version":1}`
//! 3. Client sends requests: `{"command":"read-key","data":{"key":"k"},"requestID":"1"}`
//! 4. Server answers each with `{"type":"response","ok":true,"requestID":"1","data":…}`
//!    and interleaves pushes `{"type":"push","key":"k","value":"v"}` for
//!    subscribed keys and prefixes.
//!
//! ## Error Codes
//! Failed responses carry `data: {"error": <code>, "message": <text>}` with
//! codes `missing-param`, `invalid-format`, `server-error` and
//! `unrecognized-command`.

mod command;
mod response;
mod codec;

pub use command::{
    ClientHello, Request, CMD_LIST_KEYS, CMD_PROTO_VERSION, CMD_READ_BULK, CMD_READ_KEY,
    CMD_READ_PREFIX, CMD_SUBSCRIBE_KEY, CMD_SUBSCRIBE_PREFIX, CMD_UNSUBSCRIBE_KEY,
    CMD_UNSUBSCRIBE_PREFIX, CMD_WRITE_BULK, CMD_WRITE_KEY, COMMAND_NAMES, PROTO_VERSION,
};
pub use response::{ErrorBody, ServerMessage};
pub use codec::{
    decode_frame, decode_hello, decode_request, decode_server_message, encode_frame,
    encode_message, read_frame, write_frame, HEADER_SIZE, MAX_FRAME_SIZE,
};
