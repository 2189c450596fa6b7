//! tzindex CLI: follow a node and index its chain.
//!
//! # Commands
//! ```text
//! tzindex run     --rpc <url> [--config <file.json>] [--stop-block <N>] [--queue <N>]
//! tzindex status  --rpc <url>
//! tzindex version
//! ```

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tzindex_rpc::{BlockId, HttpClient, Node, NodeApi};

mod cmd_run;
mod config;

use config::{init_tracing, AppConfig};

#[derive(Parser)]
#[command(
    name = "tzindex",
    about = "Blockchain indexer for Tezos-family chains",
    long_about = "
tzindex follows a single node's canonical chain, decodes every block and
projects it into ledger tables, rolling back through forks.

ENVIRONMENT VARIABLES:
  TZINDEX_RPC       Node RPC URL
  TZINDEX_CONFIG    Path to a JSON config file
  RUST_LOG          Log filter, overrides the config file
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the chain from the stored tip (or genesis) onwards
    Run {
        /// Node RPC URL
        #[arg(long, env = "TZINDEX_RPC")]
        rpc: Option<String>,
        /// JSON config file with `rpc`, `log` and `crawler` sections
        #[arg(long, env = "TZINDEX_CONFIG")]
        config: Option<PathBuf>,
        /// Stop after committing this height
        #[arg(long)]
        stop_block: Option<i64>,
        /// Lookahead depth
        #[arg(long)]
        queue: Option<usize>,
        /// Blocks to stay behind the node head
        #[arg(long)]
        delay: Option<i64>,
        /// Skip flow conservation checks
        #[arg(long)]
        no_validate: bool,
        /// Global log level
        #[arg(long)]
        log_level: Option<String>,
        /// Emit JSON logs
        #[arg(long)]
        log_json: bool,
    },

    /// Show the node's chain, sync state and head
    Status {
        /// Node RPC URL
        #[arg(long, env = "TZINDEX_RPC")]
        rpc: String,
    },

    /// Show build info
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            rpc,
            config,
            stop_block,
            queue,
            delay,
            no_validate,
            log_level,
            log_json,
        } => {
            let mut app = AppConfig::load(config.as_deref())?;
            if let Some(level) = log_level {
                app.log.level = level;
            }
            app.log.json |= log_json;
            init_tracing(&app.log);

            if stop_block.is_some() {
                app.crawler.stop_block = stop_block;
            }
            if let Some(queue) = queue {
                app.crawler.queue = queue.max(1);
            }
            if let Some(delay) = delay {
                app.crawler.delay = delay.max(0);
            }
            if no_validate {
                app.crawler.validate = false;
            }

            let rpc = rpc
                .or(app.rpc)
                .ok_or_else(|| anyhow!("no node RPC URL: pass --rpc or set `rpc` in the config file"))?;
            cmd_run::run(&rpc, app.crawler).await
        }

        Commands::Status { rpc } => cmd_status(&rpc).await,

        Commands::Version => cmd_version(),
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_status(rpc: &str) -> Result<()> {
    let node = Node::new(std::sync::Arc::new(HttpClient::with_defaults(rpc)?));

    let chain_id = node.chain_id().await?;
    let status = node.status().await?;
    let version = node.version().await?;
    let head = node.header(&BlockId::Head).await?;

    println!("Node:        {}", node.url());
    println!(
        "Version:     {}.{} ({})",
        version.version.major, version.version.minor, version.network_version.chain_name
    );
    println!("Chain:       {chain_id}");
    println!(
        "Sync state:  {} (bootstrapped: {})",
        if status.sync_state.is_empty() { "unknown" } else { status.sync_state.as_str() },
        status.bootstrapped
    );
    println!("Head:        {} at level {}", head.hash, head.level);
    println!("Head time:   {}", head.timestamp.to_rfc3339());
    if let Some(protocol) = head.protocol {
        println!("Protocol:    {protocol}");
    }
    Ok(())
}

fn cmd_version() -> Result<()> {
    println!("tzindex v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Index tables:");
    for table in ["block", "account", "contract", "op", "flow", "constant", "governance"] {
        println!("  {table}");
    }
    Ok(())
}
