//! # TideKV
//!
//! A networked, namespaced key-value store that pushes changes to subscribers:
//! - Write-Ahead Logging (WAL) for durability
//! - Crash recovery with partial write handling
//! - Per-key and per-prefix change subscriptions
//! - Length-prefixed JSON protocol over TCP
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │        (reader thread + writer thread per client)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Hub                                   │
//! │     (command table, sessions, subscription registry)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Store
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Engine                                  │
//! │        WAL (append)  ─►  MemTable (RwLock)  ─►  Snapshot      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod memtable;
pub mod storage;
pub mod engine;

pub mod protocol;
pub mod subscription;
pub mod hub;
pub mod network;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{TideError, Result};
pub use config::Config;
pub use engine::Engine;
pub use hub::Hub;
pub use client::Client;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of TideKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
