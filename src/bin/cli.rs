//! keystate CLI
//!
//! Command-line interface for inspecting and editing a keystate store file.
//! Values are handled as raw JSON; each must carry a `$type` field, and an
//! `e_tag` field makes it versioned.

use std::process;

use clap::{Parser, Subcommand};
use keystate::{Config, Storage, SyncStrategy};
use serde_json::{Map, Value};
use tracing_subscriber::{fmt, EnvFilter};

/// keystate CLI
#[derive(Parser, Debug)]
#[command(name = "keystate-cli")]
#[command(about = "CLI for keystate store files")]
#[command(version)]
struct Args {
    /// Store file
    #[arg(short, long, default_value = keystate::config::DEFAULT_DATABASE_FILE)]
    database: String,

    /// fsync after every appended frame instead of once per command
    #[arg(long)]
    sync_every_write: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the values stored under one or more keys as a JSON object
    Get {
        /// Keys to read
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Store a JSON value under a key
    Put {
        /// The key to write
        key: String,

        /// The value, as JSON
        value: String,
    },

    /// Delete one or more keys
    Del {
        /// Keys to delete
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,keystate=info"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let sync_strategy = if args.sync_every_write {
        SyncStrategy::EveryWrite
    } else {
        SyncStrategy::OnClose
    };
    let config = Config::builder()
        .database_path(&args.database)
        .sync_strategy(sync_strategy)
        .build();

    let storage: Storage<Value> = match Storage::open(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&storage, args.command) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(storage: &Storage<Value>, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Get { keys } => {
            let items = storage.read(&keys, None)?;
            let found: Map<String, Value> = keys
                .iter()
                .filter_map(|key| items.get(key).map(|v| (key.clone(), v.clone())))
                .collect();
            println!("{}", serde_json::to_string_pretty(&Value::Object(found))?);
        }
        Commands::Put { key, value } => {
            let value: Value = serde_json::from_str(&value)?;
            storage.write([(key.as_str(), value)], None)?;
            tracing::info!(key = %key, "Stored value");
        }
        Commands::Del { keys } => {
            storage.delete(&keys, None)?;
            tracing::info!(count = keys.len(), "Deleted keys");
        }
    }
    Ok(())
}
