//! Hub Module
//!
//! Routes client requests to storage and fans out change notifications.
//!
//! ## Responsibilities
//! - Session registration and cleanup
//! - Command dispatch through an immutable [`CommandTable`]
//! - Committing writes and notifying matching subscribers
//!
//! ## Session Lifecycle
//! ```text
//! Connected ──register──► Active ──close/error──► Closing ──unregister──► Removed
//! ```
//!
//! ## Write Path
//! ```text
//! handler ─► write_order lock ─► Store::set_many ─► matching_subscribers ─► try-send pushes
//! ```
//! Holding `write_order` from commit through enqueue keeps pushes for a key
//! in commit order at every subscriber. Enqueueing never blocks (full
//! outbound buffers drop the push), so a slow subscriber cannot stall writers.

mod commands;
mod error;
mod session;

pub use commands::{CommandHandler, CommandTable};
pub use error::{CommandError, CommandResult};
pub use session::{
    ClientSession, Delivery, MemorySession, Outbound, SendOutcome, SessionInfo, SessionRef,
    SessionSink, SessionState,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::protocol::{encode_message, Request, ServerMessage};
use crate::storage::Store;
use crate::subscription::SubscriptionRegistry;
use crate::wal::WritePair;

/// Point-in-time hub counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Currently registered sessions
    pub sessions: usize,
    /// Requests dispatched (including rejected ones)
    pub commands_handled: u64,
    /// Pushes queued to a subscriber
    pub pushes_delivered: u64,
    /// Pushes dropped because a subscriber's buffer was full
    pub pushes_dropped: u64,
}

/// Shared command hub
pub struct Hub {
    store: Arc<dyn Store>,
    registry: SubscriptionRegistry,
    sessions: RwLock<HashMap<String, SessionRef>>,
    commands: CommandTable,
    /// Orders commit + fan-out across writers
    write_order: Mutex<()>,
    commands_handled: AtomicU64,
    pushes_delivered: AtomicU64,
    pushes_dropped: AtomicU64,
}

impl Hub {
    /// Create a hub over a store, with the built-in command set
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            registry: SubscriptionRegistry::new(),
            sessions: RwLock::new(HashMap::new()),
            commands: CommandTable::builtin(),
            write_order: Mutex::new(()),
            commands_handled: AtomicU64::new(0),
            pushes_delivered: AtomicU64::new(0),
            pushes_dropped: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Session Lifecycle
    // =========================================================================

    /// Register a session for dispatch and subscriptions
    pub fn register(&self, session: SessionRef) -> Result<()> {
        let info = session.identify().clone();
        self.registry.register_session(session.clone())?;
        self.sessions.write().insert(info.uid.clone(), session);

        tracing::info!(client = %info.uid, namespace = %info.namespace, "session registered");
        Ok(())
    }

    /// Remove a session and purge its subscriptions
    ///
    /// Idempotent: returns `false` if the session was already gone.
    pub fn unregister(&self, uid: &str) -> bool {
        let removed = self.sessions.write().remove(uid).is_some();
        let purged = self.registry.remove_session(uid);

        if removed || purged {
            tracing::info!(client = %uid, "session removed");
        }
        removed || purged
    }

    pub fn is_registered(&self, uid: &str) -> bool {
        self.sessions.read().contains_key(uid)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Handle one request and send its response to the session
    ///
    /// Never fails: every problem becomes an `ok:false` response.
    pub fn dispatch(&self, session: &SessionRef, request: Request) -> SendOutcome {
        self.commands_handled.fetch_add(1, Ordering::Relaxed);

        let result = match self.commands.get(&request.command) {
            Some(handler) => handler(self, session, &request),
            None => Err(CommandError::UnrecognizedCommand(request.command.clone())),
        };

        let message = match result {
            Ok(data) => ServerMessage::ok(request.request_id, data),
            Err(e) => {
                match &e {
                    CommandError::Server(inner) => tracing::warn!(
                        client = %session.identify().uid,
                        command = %request.command,
                        error = %inner,
                        "command failed"
                    ),
                    _ => tracing::debug!(
                        client = %session.identify().uid,
                        command = %request.command,
                        error = %e,
                        "rejected request"
                    ),
                }
                ServerMessage::error(request.request_id, e.code(), e.to_string())
            }
        };

        self.reply(session, &message)
    }

    /// Send a reply-class message to a session
    pub fn reply(&self, session: &SessionRef, message: &ServerMessage) -> SendOutcome {
        match encode_message(message) {
            Ok(frame) => session.send_message(frame, Delivery::Reply),
            Err(e) => {
                tracing::error!(client = %session.identify().uid, error = %e, "failed to encode reply");
                SendOutcome::Disconnected
            }
        }
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Atomically apply namespaced writes, then notify subscribers
    pub fn commit(&self, writes: Vec<WritePair>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let _order = self.write_order.lock();
        self.store.set_many(writes.clone())?;

        for (key, value) in &writes {
            self.fan_out(key, value);
        }
        Ok(())
    }

    /// Queue a push for one written key to every matching session
    fn fan_out(&self, key: &[u8], value: &[u8]) {
        let subscribers = self.registry.matching_subscribers(key);
        if subscribers.is_empty() {
            return;
        }

        // Sessions sharing a namespace receive the same frame
        let mut frames: HashMap<&str, Bytes> = HashMap::new();

        for subscriber in &subscribers {
            let info = subscriber.identify();
            let frame = match frames.get(info.namespace.as_str()) {
                Some(frame) => frame.clone(),
                None => {
                    let Some(relative) = key.strip_prefix(info.namespace.as_bytes()) else {
                        continue;
                    };
                    let message = ServerMessage::push(
                        String::from_utf8_lossy(relative),
                        String::from_utf8_lossy(value),
                    );
                    match encode_message(&message) {
                        Ok(frame) => {
                            frames.insert(info.namespace.as_str(), frame.clone());
                            frame
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to encode push");
                            continue;
                        }
                    }
                }
            };

            match subscriber.send_message(frame, Delivery::Push) {
                SendOutcome::Sent => {
                    self.pushes_delivered.fetch_add(1, Ordering::Relaxed);
                }
                SendOutcome::BufferFull => {
                    self.pushes_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(client = %info.uid, "outbound buffer full, push dropped");
                }
                SendOutcome::TimedOut | SendOutcome::Disconnected => {
                    tracing::trace!(client = %info.uid, "push to closed session discarded");
                }
            }
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            sessions: self.session_count(),
            commands_handled: self.commands_handled.load(Ordering::Relaxed),
            pushes_delivered: self.pushes_delivered.load(Ordering::Relaxed),
            pushes_dropped: self.pushes_dropped.load(Ordering::Relaxed),
        }
    }
}
