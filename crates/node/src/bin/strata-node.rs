// Path: crates/node/src/bin/strata-node.rs
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata_node::IndexerNode;
use strata_poi::RegenMode;
use strata_types::config::IndexerConfig;

#[derive(Parser, Debug)]
#[clap(name = "strata-node", about = "Runs the strata indexer store services.")]
struct NodeOpts {
    #[clap(long, env = "STRATA_CONFIG", help = "Path to the indexer TOML configuration file.")]
    config: PathBuf,
    #[clap(
        long,
        env = "STRATA_LOG",
        default_value = strata_telemetry::init::DEFAULT_FILTER,
        help = "Log filter used when RUST_LOG is unset."
    )]
    log_filter: String,
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the cache, POI and accumulator services until ctrl-c.
    Run,
    /// Repair divergence between the POI chain and the accumulator, then exit.
    Regenerate {
        #[clap(long = "targetHeight", help = "First height to rebuild from.")]
        target_height: Option<u64>,
        #[clap(
            long = "unsafe",
            help = "Copy missing accumulator leaves from the POI table instead of refusing."
        )]
        unsafe_mode: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = NodeOpts::parse();
    strata_telemetry::init::init_tracing(&opts.log_filter)?;
    tracing::info!(target: "node", event = "startup", config = %opts.config.display());
    let config = IndexerConfig::load(&opts.config)
        .with_context(|| format!("failed to load config {}", opts.config.display()))?;
    let node = IndexerNode::open(config)?;

    match opts.command.unwrap_or(Command::Run) {
        Command::Run => {
            node.start()?;
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!(target: "node", event = "shutdown", reason = "ctrl-c");
                }
            }
            node.shutdown().await?;
        }
        Command::Regenerate {
            target_height,
            unsafe_mode,
        } => {
            let mode = if unsafe_mode {
                RegenMode::Unsafe
            } else {
                RegenMode::Safe
            };
            let report = node.regenerate(mode, target_height).await?;
            tracing::info!(target: "node", ?report, "regeneration complete");
            node.shutdown().await?;
        }
    }
    Ok(())
}
