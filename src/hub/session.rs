//! Client sessions
//!
//! The hub and the subscription registry only see sessions through
//! [`SessionSink`]: who the session is, and a way to hand it an encoded frame.
//! [`ClientSession`] backs a network connection with a bounded channel;
//! [`MemorySession`] keeps frames in memory for in-process clients.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use crate::error::Result;
use crate::protocol::{decode_server_message, ServerMessage, HEADER_SIZE};

/// Shared handle to a session, as stored by the hub and registry
pub type SessionRef = Arc<dyn SessionSink>;

/// Identity of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Unique id, assigned at accept time
    pub uid: String,
    /// Prefix applied to every key the session supplies
    pub namespace: String,
}

impl SessionInfo {
    /// New identity with a random uid
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            uid: uuid::Uuid::new_v4().to_string(),
            namespace: namespace.into(),
        }
    }

    /// Identity with a caller-chosen uid
    pub fn with_uid(uid: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            namespace: namespace.into(),
        }
    }
}

/// How a frame should be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A reply to the session's own request: may wait for room
    Reply,
    /// A notification: must never block the caller
    Push,
}

/// Result of handing a frame to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for delivery
    Sent,
    /// Outbound buffer full; the frame was dropped
    BufferFull,
    /// A reply could not be queued in time; the session has been closed
    TimedOut,
    /// The session is closed; the frame was discarded
    Disconnected,
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Accepted, handshake done, not yet registered
    Connected = 0,
    /// Registered with the hub; requests are dispatched
    Active = 1,
    /// Transport closed or protocol error; cleanup pending
    Closing = 2,
    /// Purged from the hub and registry (terminal)
    Removed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Connected,
            1 => SessionState::Active,
            2 => SessionState::Closing,
            _ => SessionState::Removed,
        }
    }
}

/// What the hub needs from a session
///
/// Implementations must be cheap to call from any thread. `Delivery::Push`
/// must return immediately whatever the state of the buffer.
pub trait SessionSink: Send + Sync {
    /// Who this session is
    fn identify(&self) -> &SessionInfo;

    /// Queue an encoded frame
    fn send_message(&self, frame: Bytes, delivery: Delivery) -> SendOutcome;
}

// =============================================================================
// ClientSession
// =============================================================================

/// A network-backed session
///
/// Frames go through a bounded channel drained by the connection's writer
/// thread. When the channel is full, replies wait up to `reply_timeout` and
/// pushes are dropped (drop-newest).
pub struct ClientSession {
    info: SessionInfo,
    frames: Sender<Bytes>,
    /// Dropping this sender wakes the writer and tells it to stop
    close_signal: Mutex<Option<Sender<()>>>,
    state: AtomicU8,
    reply_timeout: Duration,
    pushes_dropped: AtomicU64,
}

/// Receiving half of a [`ClientSession`], owned by the writer thread
pub struct Outbound {
    frames: Receiver<Bytes>,
    closed: Receiver<()>,
}

impl ClientSession {
    /// Create a session and the receiving half of its outbound channel
    pub fn new(info: SessionInfo, capacity: usize, reply_timeout: Duration) -> (Arc<Self>, Outbound) {
        let (frames_tx, frames_rx) = channel::bounded(capacity.max(1));
        let (close_tx, close_rx) = channel::bounded(0);

        let session = Arc::new(Self {
            info,
            frames: frames_tx,
            close_signal: Mutex::new(Some(close_tx)),
            state: AtomicU8::new(SessionState::Connected as u8),
            reply_timeout,
            pushes_dropped: AtomicU64::new(0),
        });
        let outbound = Outbound {
            frames: frames_rx,
            closed: close_rx,
        };
        (session, outbound)
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Connected → Active
    pub fn activate(&self) {
        let _ = self.state.compare_exchange(
            SessionState::Connected as u8,
            SessionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Move to Closing and stop the writer; idempotent
    pub fn close(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s < SessionState::Closing as u8).then_some(SessionState::Closing as u8)
            });
        self.close_signal.lock().take();
    }

    /// Terminal state, once the hub has purged the session
    pub fn mark_removed(&self) {
        self.close();
        self.state.store(SessionState::Removed as u8, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) >= SessionState::Closing as u8
    }

    /// Pushes dropped because the outbound channel was full
    pub fn pushes_dropped(&self) -> u64 {
        self.pushes_dropped.load(Ordering::Relaxed)
    }
}

impl SessionSink for ClientSession {
    fn identify(&self) -> &SessionInfo {
        &self.info
    }

    fn send_message(&self, frame: Bytes, delivery: Delivery) -> SendOutcome {
        if self.is_closed() {
            return SendOutcome::Disconnected;
        }

        match delivery {
            Delivery::Reply => match self.frames.send_timeout(frame, self.reply_timeout) {
                Ok(()) => SendOutcome::Sent,
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!(client = %self.info.uid, "reply timed out, closing stalled session");
                    self.close();
                    SendOutcome::TimedOut
                }
                Err(SendTimeoutError::Disconnected(_)) => SendOutcome::Disconnected,
            },
            Delivery::Push => match self.frames.try_send(frame) {
                Ok(()) => SendOutcome::Sent,
                Err(TrySendError::Full(_)) => {
                    self.pushes_dropped.fetch_add(1, Ordering::Relaxed);
                    SendOutcome::BufferFull
                }
                Err(TrySendError::Disconnected(_)) => SendOutcome::Disconnected,
            },
        }
    }
}

impl Outbound {
    /// Next frame to write, or `None` once the session is closed and drained
    ///
    /// Frames queued before the close are still handed out, so a final error
    /// reply reaches the client ahead of the hang-up.
    pub fn next_frame(&self) -> Option<Bytes> {
        if let Ok(frame) = self.frames.try_recv() {
            return Some(frame);
        }
        crossbeam::select! {
            recv(self.frames) -> frame => frame.ok(),
            recv(self.closed) -> _ => self.frames.try_recv().ok(),
        }
    }
}

// =============================================================================
// MemorySession
// =============================================================================

/// An in-process session that keeps frames in a bounded queue
///
/// Replies are always kept; pushes beyond `capacity` queued frames are dropped.
pub struct MemorySession {
    info: SessionInfo,
    capacity: usize,
    frames: Mutex<VecDeque<Bytes>>,
    closed: AtomicBool,
}

impl MemorySession {
    pub fn new(namespace: impl Into<String>, capacity: usize) -> Arc<Self> {
        Self::with_info(SessionInfo::new(namespace), capacity)
    }

    pub fn with_info(info: SessionInfo, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            info,
            capacity,
            frames: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.frames.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of queued frames
    pub fn pending(&self) -> usize {
        self.frames.lock().len()
    }

    /// Take every queued message, oldest first
    pub fn drain(&self) -> Result<Vec<ServerMessage>> {
        let frames: Vec<Bytes> = self.frames.lock().drain(..).collect();
        frames
            .iter()
            .map(|frame| decode_server_message(&frame[HEADER_SIZE..]))
            .collect()
    }
}

impl SessionSink for MemorySession {
    fn identify(&self) -> &SessionInfo {
        &self.info
    }

    fn send_message(&self, frame: Bytes, delivery: Delivery) -> SendOutcome {
        if self.is_closed() {
            return SendOutcome::Disconnected;
        }
        let mut frames = self.frames.lock();
        if delivery == Delivery::Push && frames.len() >= self.capacity {
            return SendOutcome::BufferFull;
        }
        frames.push_back(frame);
        SendOutcome::Sent
    }
}
