//! Connection Handler
//!
//! Handles individual client connections.

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Config;
use crate::error::{Result, TideError};
use crate::hub::{ClientSession, Hub, Outbound, SessionInfo, SessionRef, SessionSink};
use crate::protocol::{
    decode_hello, decode_request, read_frame, write_frame, ServerMessage, PROTO_VERSION,
};

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// Original stream, cloned for the writer thread and shut down on exit
    stream: TcpStream,

    /// Shared command hub
    hub: Arc<Hub>,

    config: Config,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler
    ///
    /// Sets up buffered I/O and configures timeouts
    pub fn new(stream: TcpStream, hub: Arc<Hub>, config: &Config) -> Result<Self> {
        // Get peer address for logging before we split the stream
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        if config.read_timeout_ms > 0 {
            stream.set_read_timeout(Some(Duration::from_millis(config.read_timeout_ms)))?;
        }
        if config.write_timeout_ms > 0 {
            stream.set_write_timeout(Some(Duration::from_millis(config.write_timeout_ms)))?;
        }

        let read_stream = stream.try_clone()?;

        Ok(Self {
            reader: BufReader::new(read_stream),
            stream,
            hub,
            config: config.clone(),
            peer_addr,
        })
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Performs the handshake, registers the session, then reads requests in
    /// a loop. Returns when the client disconnects or an error occurs; the
    /// session is always unregistered before returning.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        let hello = match read_frame(&mut self.reader) {
            Ok(Some(payload)) => decode_hello(&payload)?,
            Ok(None) => {
                tracing::debug!("Client {} left before handshake", self.peer_addr);
                return Ok(());
            }
            Err(e) if is_disconnect(&e) => return Ok(()),
            Err(e) => return Err(e),
        };

        let info = SessionInfo::new(hello.namespace);
        let (session, outbound) = ClientSession::new(
            info.clone(),
            self.config.outbound_capacity,
            self.config.reply_timeout(),
        );
        let session_ref: SessionRef = session.clone();

        let writer = self.spawn_writer(outbound, Arc::clone(&session))?;

        let result = match self.hub.register(session_ref.clone()) {
            Ok(()) => {
                session.activate();
                let hello = ServerMessage::Hello {
                    uid: info.uid.clone(),
                    version: PROTO_VERSION,
                };
                self.hub.reply(&session_ref, &hello);
                self.serve(&session, &session_ref)
            }
            Err(e) => Err(e),
        };

        // Closing → Removed
        session.close();
        self.hub.unregister(&info.uid);
        session.mark_removed();
        // The writer flushes what is queued, then exits on the close signal
        if writer.join().is_err() {
            tracing::warn!("Writer thread for {} panicked", self.peer_addr);
        }
        let _ = self.stream.shutdown(Shutdown::Both);

        tracing::debug!(client = %info.uid, "Client {} disconnected", self.peer_addr);
        result
    }

    /// Request loop for an active session
    fn serve(&mut self, session: &ClientSession, session_ref: &SessionRef) -> Result<()> {
        loop {
            let payload = match read_frame(&mut self.reader) {
                Ok(Some(payload)) => payload,
                Ok(None) => return Ok(()),
                Err(e) if is_disconnect(&e) => return Ok(()),
                Err(TideError::Protocol(reason)) => {
                    tracing::warn!("Protocol error from {}: {}", self.peer_addr, reason);
                    let message = ServerMessage::error("", "invalid-format", reason.clone());
                    self.hub.reply(session_ref, &message);
                    return Err(TideError::Protocol(reason));
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    return Err(e);
                }
            };

            match decode_request(&payload) {
                Ok(request) => {
                    tracing::trace!(
                        client = %session.identify().uid,
                        command = %request.command,
                        "Received request from {}",
                        self.peer_addr
                    );
                    self.hub.dispatch(session_ref, request);
                }
                Err(e) => {
                    // Malformed JSON is not fatal; framing is still intact
                    tracing::debug!("Malformed request from {}: {}", self.peer_addr, e);
                    let message = ServerMessage::error("", "invalid-format", e.to_string());
                    self.hub.reply(session_ref, &message);
                }
            }

            if session.is_closed() {
                tracing::debug!("Session for {} closed while serving", self.peer_addr);
                return Ok(());
            }
        }
    }

    /// Start the thread that drains the outbound channel into the socket
    fn spawn_writer(&self, outbound: Outbound, session: Arc<ClientSession>) -> Result<JoinHandle<()>> {
        let stream = self.stream.try_clone()?;
        let peer_addr = self.peer_addr.clone();

        thread::Builder::new()
            .name(format!("tidekv-writer-{}", peer_addr))
            .spawn(move || {
                let mut writer = BufWriter::new(stream);
                while let Some(frame) = outbound.next_frame() {
                    if let Err(e) = write_frame(&mut writer, &frame) {
                        tracing::debug!("Error writing to {}: {}", peer_addr, e);
                        session.close();
                        // Unblock the reader so the connection winds down
                        let _ = writer.get_ref().shutdown(Shutdown::Both);
                        break;
                    }
                }
            })
            .map_err(TideError::Io)
    }
}

/// Whether an error just means the peer went away (or went quiet past the read timeout)
fn is_disconnect(e: &TideError) -> bool {
    match e {
        TideError::Io(io) => matches!(
            io.kind(),
            ErrorKind::UnexpectedEof
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::WouldBlock
                | ErrorKind::TimedOut
        ),
        _ => false,
    }
}

