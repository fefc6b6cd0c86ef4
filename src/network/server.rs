//! TCP Server
//!
//! Accepts connections and hands each one to its own worker thread.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Result, TideError};
use crate::hub::Hub;

use super::Connection;

/// How often the accept loop checks the shutdown flag when idle
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// TCP server for TideKV
pub struct Server {
    config: Config,
    hub: Arc<Hub>,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    active_connections: Arc<AtomicUsize>,
}

/// Stops a running [`Server`] from another thread
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Decrements the live-connection counter when a worker exits
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Server {
    /// Create a new server bound to `config.listen_addr`
    pub fn new(config: Config, hub: Arc<Hub>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).map_err(|e| {
            TideError::Network(format!("cannot bind {}: {}", config.listen_addr, e))
        })?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            config,
            hub,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start the server (blocking until shutdown)
    pub fn run(&self) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "listening");

        while !self.shutdown.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, addr)) => self.accept(stream, addr),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        tracing::info!("accept loop stopped");
        Ok(())
    }

    /// Signal the server to shutdown gracefully
    ///
    /// Stops accepting; established connections run until their clients leave.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    /// Number of connections currently being served
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        let active = self.active_connections.fetch_add(1, Ordering::AcqRel);
        let slot = ConnectionSlot(Arc::clone(&self.active_connections));

        if active >= self.config.max_connections {
            tracing::warn!(
                peer = %addr,
                max = self.config.max_connections,
                "connection limit reached, rejecting"
            );
            return;
        }

        // Accepted sockets may inherit the listener's non-blocking mode
        if let Err(e) = stream.set_nonblocking(false) {
            tracing::warn!(peer = %addr, error = %e, "cannot configure socket");
            return;
        }

        let hub = Arc::clone(&self.hub);
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name(format!("tidekv-conn-{}", addr))
            .spawn(move || {
                let _slot = slot;
                let outcome = Connection::new(stream, hub, &config).and_then(|mut c| c.handle());
                if let Err(e) = outcome {
                    tracing::warn!(peer = %addr, error = %e, "connection ended with error");
                }
            });

        if let Err(e) = spawned {
            tracing::error!(peer = %addr, error = %e, "cannot spawn connection worker");
        }
    }
}
