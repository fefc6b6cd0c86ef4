//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single acceptor thread
//! - One reader/dispatcher thread per connection
//! - One writer thread per connection draining its session's outbound channel
//! - Requests routed through the shared [`crate::hub::Hub`]

mod server;
mod connection;

pub use server::{Server, ShutdownHandle};
pub use connection::Connection;
