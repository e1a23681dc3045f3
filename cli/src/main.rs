//! stakeindex CLI — run the sync loop against a chain node.
//!
//! Usage:
//! ```bash
//! stakeindex run --node http://localhost:8732 --chain mainnet \
//!     --protocols protocols.json --cursor-db stakeindex.db
//! stakeindex version
//! ```
//!
//! The protocols file is a JSON array of protocol parameter sets; the model
//! is rebuilt by replay from the first covered level on every start, with
//! the cursor recording progress for monitoring and restart detection.

use std::env;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use stakeindex_core::model::Protocol;
use stakeindex_core::SyncSession;
use stakeindex_rpc::NodeClient;
use stakeindex_storage::{CursorManager, SqliteCursorStore};
use stakeindex_sync::{Syncer, SyncerConfig};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("stakeindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("stakeindex {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-safe staking and consensus indexer\n");
    println!("USAGE:");
    println!("    stakeindex <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run      Sync a chain (see `run` options below)");
    println!("    version  Print version");
    println!("    help     Print this help\n");
    println!("RUN OPTIONS:");
    println!("    --node <URL>            Node RPC base URL (required)");
    println!("    --chain <ID>            Chain identifier for the cursor (required)");
    println!("    --protocols <FILE>      JSON array of protocol parameters (required)");
    println!("    --cursor-db <PATH>      SQLite file for progress cursors");
    println!("    --cursor-interval <N>   Save the cursor every N blocks (default 100)");
    println!("    --poll-secs <N>         Head poll interval in seconds (default 5)");
}

/// One `--flag value` scan; flags may appear in any order.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn cmd_run(args: &[String]) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Some(node) = flag_value(args, "--node") else {
        bail!("--node is required");
    };
    let Some(chain) = flag_value(args, "--chain") else {
        bail!("--chain is required");
    };
    let Some(protocols_path) = flag_value(args, "--protocols") else {
        bail!("--protocols is required");
    };
    let cursor_db = flag_value(args, "--cursor-db");
    let cursor_interval: u64 = flag_value(args, "--cursor-interval")
        .unwrap_or("100")
        .parse()
        .context("--cursor-interval must be a positive integer")?;
    let poll_secs: u64 = flag_value(args, "--poll-secs")
        .unwrap_or("5")
        .parse()
        .context("--poll-secs must be a positive integer")?;

    let raw = std::fs::read_to_string(protocols_path)
        .with_context(|| format!("reading {protocols_path}"))?;
    let protocols: Vec<Protocol> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {protocols_path}"))?;
    if protocols.is_empty() {
        bail!("{protocols_path} lists no protocols");
    }

    let session = SyncSession::new(protocols).context("validating protocol parameters")?;
    let config = SyncerConfig {
        poll_interval: Duration::from_secs(poll_secs),
        ..SyncerConfig::default()
    };

    let runtime = tokio::runtime::Runtime::new().context("starting the async runtime")?;
    runtime.block_on(async move {
        let mut syncer = Syncer::new(NodeClient::new(node), session, config);

        if let Some(path) = cursor_db {
            let store = SqliteCursorStore::open(path)
                .await
                .with_context(|| format!("opening cursor database {path}"))?;
            let manager = CursorManager::new(Box::new(store), chain, cursor_interval);
            if let Some(cursor) = manager.load().await? {
                tracing::info!(
                    chain,
                    level = cursor.level,
                    "previous run recorded progress; rebuilding state by replay"
                );
            }
            syncer = syncer.with_cursor(manager);
        }

        tracing::info!(chain, node, "starting sync");
        syncer.run().await.context("sync loop failed")
    })
}
