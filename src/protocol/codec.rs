//! Protocol codec
//!
//! Framing and JSON encoding for the wire protocol.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬─────────────────────────────┐
//! │ Len (4)  │         Payload             │
//! └──────────┴─────────────────────────────┘
//! ```
//! `Len` is the big-endian payload length; the payload is one JSON message.

use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TideError};
use super::{ClientHello, Request, ServerMessage};

/// Header size: 4 bytes length
pub const HEADER_SIZE: usize = 4;

/// Maximum payload size (16 MB)
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

// =============================================================================
// Frame Encoding
// =============================================================================

/// Wrap a payload in a frame
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(TideError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Encode a server message as a complete frame
pub fn encode_message(message: &ServerMessage) -> Result<Bytes> {
    let payload = serde_json::to_vec(message)?;
    encode_frame(&payload)
}

/// Split one complete frame payload off the front of `buf`
///
/// Returns `Ok(None)` until the header and the whole payload are buffered;
/// a partial frame stays in `buf` for the next call.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<BytesMut>> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if payload_len > MAX_FRAME_SIZE {
        return Err(TideError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_FRAME_SIZE
        )));
    }

    if buf.len() < HEADER_SIZE + payload_len as usize {
        return Ok(None);
    }

    buf.advance(HEADER_SIZE);
    Ok(Some(buf.split_to(payload_len as usize)))
}

// =============================================================================
// Message Decoding
// =============================================================================

/// Decode a request payload
pub fn decode_request(payload: &[u8]) -> Result<Request> {
    serde_json::from_slice(payload)
        .map_err(|e| TideError::Protocol(format!("malformed request: {}", e)))
}

/// Decode a handshake payload
pub fn decode_hello(payload: &[u8]) -> Result<ClientHello> {
    serde_json::from_slice(payload)
        .map_err(|e| TideError::Protocol(format!("malformed hello: {}", e)))
}

/// Decode a server message payload (client side)
pub fn decode_server_message(payload: &[u8]) -> Result<ServerMessage> {
    serde_json::from_slice(payload)
        .map_err(|e| TideError::Protocol(format!("malformed server message: {}", e)))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one frame payload from a stream
///
/// Returns `Ok(None)` if the stream ends cleanly between frames. A stream
/// that ends inside a frame yields an `UnexpectedEof` I/O error.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "stream ended inside frame header",
                )
                .into())
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let payload_len = u32::from_be_bytes(header);
    if payload_len > MAX_FRAME_SIZE {
        return Err(TideError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Write a frame to a stream
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame)?;
    writer.flush()?;
    Ok(())
}
