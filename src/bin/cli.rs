//! TideKV CLI Client
//!
//! Command-line interface for interacting with TideKV.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tidekv::Client;

/// TideKV CLI
#[derive(Parser, Debug)]
#[command(name = "tidekv-cli")]
#[command(about = "CLI for the TideKV key-value store")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:4338")]
    server: String,

    /// Namespace prefix applied to every key
    #[arg(short, long, default_value = "")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key ("" if absent)
    Get {
        /// The key to get
        key: String,
    },

    /// Get several keys at once
    Mget {
        /// The keys to get
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Print every key/value under a prefix
    Scan {
        /// The prefix to scan
        prefix: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// List keys, optionally under a prefix
    Keys {
        /// Only keys starting with this prefix
        prefix: Option<String>,
    },

    /// Print the server protocol version
    Version,

    /// Subscribe and print every change until interrupted
    Watch {
        /// Keys to watch
        #[arg(short, long)]
        key: Vec<String>,

        /// Prefixes to watch
        #[arg(short, long)]
        prefix: Vec<String>,
    },
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> tidekv::Result<()> {
    let mut client = Client::connect(&args.server, &args.namespace)?;

    match args.command {
        Commands::Get { key } => {
            println!("{}", client.read_key(&key)?);
        }
        Commands::Mget { keys } => {
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            for (key, value) in client.read_bulk(&keys)? {
                println!("{}\t{}", key, value);
            }
        }
        Commands::Scan { prefix } => {
            for (suffix, value) in client.read_prefix(&prefix)? {
                println!("{}{}\t{}", prefix, suffix, value);
            }
        }
        Commands::Set { key, value } => {
            client.write_key(&key, &value)?;
            println!("OK");
        }
        Commands::Keys { prefix } => {
            for key in client.list_keys(prefix.as_deref())? {
                println!("{}", key);
            }
        }
        Commands::Version => {
            println!("{}", client.proto_version()?);
        }
        Commands::Watch { key, prefix } => {
            if key.is_empty() && prefix.is_empty() {
                eprintln!("nothing to watch: pass --key or --prefix");
                return Ok(());
            }
            for k in &key {
                client.subscribe_key(k)?;
            }
            for p in &prefix {
                client.subscribe_prefix(p)?;
            }
            loop {
                if let Some(push) = client.next_push(Some(Duration::from_secs(60)))? {
                    println!("{}\t{}", push.key, push.value);
                }
            }
        }
    }

    Ok(())
}
