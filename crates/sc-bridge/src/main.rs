//! sc-bridge: simple-contacts command line bridge
//!
//! Runs the contacts bridge against a vCard file or a synthetic address book
//! and prints the result as JSON.
//!
//! Usage:
//!   sc-bridge check                 - Print the permission grade
//!   sc-bridge request               - Request permission, print the grade
//!   sc-bridge contacts [--summary]  - Fetch every contact
//!   sc-bridge --help                - Show help

mod commands;

use std::sync::Arc;

use sc_contacts::store::synthetic_records;
use sc_contacts::{ContactStore, ContactsBridge, MemoryStore, VcardStore};
use sc_core::Config;
use tracing_subscriber::EnvFilter;

use commands::{Command, parse_args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let invocation = parse_args(std::env::args().skip(1))
        .map_err(|e| anyhow::anyhow!("{} (see --help)", e))?;

    match invocation.command {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            println!("sc-bridge {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    // Load .env file
    dotenvy::dotenv().ok();

    let mut config = Config::load().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;
    if let Some(path) = &invocation.vcard_path {
        config.store.vcard_path = Some(path.clone());
    }

    // Initialize logging (stderr, so stdout stays JSON)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(config.log.level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting sc-bridge {}", env!("CARGO_PKG_VERSION"));

    let store = open_store(&config, invocation.demo)?;
    let bridge = Arc::new(ContactsBridge::new(store, &config));

    let output = commands::run(&bridge, &invocation).await?;
    println!("{}", output);

    Ok(())
}

/// Pick the store: synthetic records for `--demo`, otherwise the vCard file
fn open_store(config: &Config, demo: Option<usize>) -> anyhow::Result<Arc<dyn ContactStore>> {
    if let Some(count) = demo {
        tracing::info!("Using demo store with {} synthetic records", count);
        return Ok(Arc::new(MemoryStore::new(synthetic_records(count))));
    }

    let path = config
        .store
        .vcard_path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("No store configured: set SC_VCARD_PATH, pass --file or use --demo N"))?;

    let store = VcardStore::open(path).map_err(|e| anyhow::anyhow!("Failed to open vCard store: {}", e))?;
    tracing::info!("Reading contacts from {}", store.path().display());
    Ok(Arc::new(store))
}

/// Print help message
fn print_help() {
    println!("sc-bridge - simple-contacts bridge");
    println!();
    println!("Usage:");
    println!("  sc-bridge check                Print the permission grade");
    println!("  sc-bridge request              Request permission and print the grade");
    println!("  sc-bridge contacts             Fetch every contact as JSON");
    println!("  sc-bridge --help               Show this help message");
    println!("  sc-bridge --version            Show version");
    println!();
    println!("Options:");
    println!("  --summary                      Include fetch statistics (contacts only)");
    println!("  --demo <N>                     Use N synthetic records instead of a vCard file");
    println!("  --file <PATH>                  vCard file to read (overrides SC_VCARD_PATH)");
    println!();
    println!("Environment Variables:");
    println!("  SC_VCARD_PATH                  vCard file to read");
    println!("  SC_BATCH_SIZE                  Records per batch (default: 200)");
    println!("  SC_MAX_CONCURRENCY             Batches in flight (default: min(4, cpus))");
    println!("  SC_INITIAL_CAPACITY            Result capacity hint (default: 1000)");
    println!("  SC_RESULT_ORDER                enumeration or arrival (default: enumeration)");
    println!("  SC_DENIED_POLICY               empty or error (default: empty)");
    println!("  SC_PROBE_RESTRICTED            Probe restricted access (default: true)");
    println!("  SC_LOG_LEVEL                   Default log directive (default: info)");
    println!("  RUST_LOG                       Log filter, takes precedence");
}
