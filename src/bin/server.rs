//! TideKV Server Binary
//!
//! Starts the TCP server for TideKV.

use std::sync::Arc;

use clap::Parser;
use tidekv::config::WalSyncStrategy;
use tidekv::network::Server;
use tidekv::{Config, Engine, Hub};
use tracing_subscriber::{fmt, EnvFilter};

/// TideKV Server
#[derive(Parser, Debug)]
#[command(name = "tidekv-server")]
#[command(about = "Namespaced key-value store with live change notifications")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./tidekv_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:4338")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Frames buffered per client before pushes are dropped
    #[arg(long, default_value = "256")]
    outbound_capacity: usize,

    /// WAL size in MB that triggers a checkpoint
    #[arg(long, default_value = "16")]
    checkpoint_mb: u64,

    /// fsync the WAL every N batches (1 = every batch)
    #[arg(long, default_value = "100")]
    sync_every: usize,
}

fn main() {
    let args = Args::parse();

    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tidekv={}", args.log_level, args.log_level)));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("TideKV Server v{}", tidekv::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    let sync_strategy = match args.sync_every {
        0 | 1 => WalSyncStrategy::EveryWrite,
        count => WalSyncStrategy::EveryNEntries { count },
    };

    // Build config from args
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .outbound_capacity(args.outbound_capacity)
        .checkpoint_threshold(args.checkpoint_mb * 1024 * 1024)
        .wal_sync_strategy(sync_strategy)
        .build();

    // Open engine
    let engine = match Engine::open(config.clone()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(keys = engine.key_count(), "Engine initialized successfully");

    let hub = Arc::new(Hub::new(engine));

    // Start server
    let server = match Server::new(config, hub) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
