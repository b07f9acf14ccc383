//! Istanbul BFT CLI
//!
//! Runs in-process validator networks and small operator utilities.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ibft_committee::{calc_fault_tolerance, calc_quorum_size, voting_population};
use ibft_core::ProposerPolicy;
use ibft_crypto::KeyPair;
use ibft_node::local::{simulation_key, LocalNetwork};
use ibft_node::metrics::serve as serve_metrics;
use ibft_node::{init_logging, ConsensusMetrics, NodeConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ibft")]
#[command(version)]
#[command(about = "Istanbul BFT consensus engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "ibft.toml")]
    config: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run validators in this process until they reach a height
    Simulate {
        /// Number of validators
        #[arg(short = 'n', long, default_value = "4")]
        validators: usize,

        /// Height every running validator must reach
        #[arg(long, default_value = "10")]
        heights: u64,

        /// Share of messages dropped by the bus
        #[arg(long, default_value = "0.0")]
        drop_rate: f64,

        /// Validators to stop right after start
        #[arg(long)]
        halt: Vec<usize>,

        /// Override the proposer policy
        #[arg(long)]
        policy: Option<ProposerPolicy>,

        /// Override the committee size
        #[arg(long)]
        committee_size: Option<u64>,

        /// Give up after this many seconds
        #[arg(long, default_value = "120")]
        timeout_secs: u64,
    },

    /// Generate a validator key
    Keygen {
        /// Derive the key from a seed instead of the OS RNG
        #[arg(long)]
        seed: Option<String>,
    },

    /// Show quorum size and fault tolerance per validator count
    Quorum {
        /// Largest validator count listed
        #[arg(short = 'n', long, default_value = "22")]
        max_validators: usize,

        /// Committee size cap
        #[arg(long, default_value = "21")]
        committee_size: u64,
    },

    /// Print the effective configuration or write it to a file
    Config {
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct BlockSummary {
    number: u64,
    hash: String,
    proposer: String,
    round: u64,
    committee: usize,
    committers: usize,
}

#[derive(Serialize)]
struct SimulationReport {
    validators: usize,
    halted: Vec<usize>,
    reached: bool,
    consistent: bool,
    heights: Vec<u64>,
    delivered: u64,
    dropped: u64,
    blocks: Vec<BlockSummary>,
}

struct QuorumRow {
    validators: usize,
    voters: usize,
    quorum: usize,
    tolerated_faults: usize,
}

#[derive(Serialize)]
struct KeyReport {
    address: String,
    public_key: String,
    secret_key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = NodeConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging);

    match cli.command {
        Commands::Simulate {
            validators,
            heights,
            drop_rate,
            halt,
            policy,
            committee_size,
            timeout_secs,
        } => {
            if let Some(policy) = policy {
                config.governance.policy = policy;
            }
            if let Some(committee_size) = committee_size {
                config.governance.committee_size = committee_size;
            }
            config.validate()?;
            simulate(&config, validators, heights, drop_rate, halt, timeout_secs).await?;
        }

        Commands::Keygen { seed } => {
            let key = match seed {
                Some(seed) => KeyPair::from_seed(seed.as_bytes()),
                None => KeyPair::generate(),
            };
            let report = KeyReport {
                address: key.address().to_string(),
                public_key: hex::encode(key.public_key_bytes()),
                secret_key: hex::encode(key.secret_key_bytes()),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Quorum {
            max_validators,
            committee_size,
        } => {
            let rows: Vec<QuorumRow> = (1..=max_validators)
                .map(|validators| QuorumRow {
                    validators,
                    voters: voting_population(validators, committee_size),
                    quorum: calc_quorum_size(validators, committee_size),
                    tolerated_faults: calc_fault_tolerance(validators, committee_size),
                })
                .collect();
            println!("{:>10} {:>7} {:>7} {:>7}", "validators", "voters", "quorum", "faults");
            for row in &rows {
                println!(
                    "{:>10} {:>7} {:>7} {:>7}",
                    row.validators, row.voters, row.quorum, row.tolerated_faults
                );
            }
        }

        Commands::Config { output } => match output {
            Some(path) => {
                config.save(&path)?;
                println!("Configuration written to {}", path.display());
            }
            None => print!("{}", config.to_toml()?),
        },
    }

    Ok(())
}

async fn simulate(
    config: &NodeConfig,
    validators: usize,
    heights: u64,
    drop_rate: f64,
    halt: Vec<usize>,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    tracing::info!(validators, heights, drop_rate, policy = %config.governance.policy, "Starting simulation");

    let metrics = Arc::new(ConsensusMetrics::new()?);
    if config.metrics.enabled {
        let metrics = metrics.clone();
        let address = config.metrics.address.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_metrics(metrics, &address).await {
                tracing::warn!(%err, "Metrics server stopped");
            }
        });
    }

    let keys = (0..validators)
        .map(|index| simulation_key(config, index))
        .collect();
    let mut network = LocalNetwork::start_with_keys(config, keys, Some(metrics))?;
    network.bus().set_drop_rate(drop_rate);
    for index in &halt {
        network.halt(*index).await;
    }

    let reached = network
        .wait_for_height(heights, Duration::from_secs(timeout_secs))
        .await;
    if !reached {
        tracing::warn!(heights = ?network.heights(), "Target height not reached");
    }

    let reference = network
        .nodes()
        .iter()
        .find(|node| node.is_running())
        .context("every validator was halted")?;
    let mut blocks = Vec::new();
    for number in 1..=reference.chain().height() {
        let Some(block) = reference.chain().block(number) else {
            break;
        };
        let info = reference
            .backend()
            .snapshots()
            .consensus_info(&block.header)?;
        blocks.push(BlockSummary {
            number,
            hash: info.hash.to_hex(),
            proposer: info.proposer.to_string(),
            round: info.round,
            committee: info.committee.len(),
            committers: info.committers.len(),
        });
    }

    let stats = network.bus().stats();
    let report = SimulationReport {
        validators,
        halted: halt,
        reached,
        consistent: network.is_consistent(),
        heights: network.heights(),
        delivered: stats.delivered,
        dropped: stats.dropped,
        blocks,
    };
    network.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.consistent {
        anyhow::bail!("validators disagree on the chain");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_simulate_arguments() {
        let cli = Cli::try_parse_from([
            "ibft", "simulate", "-n", "7", "--policy", "sticky", "--halt", "1", "--halt", "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Simulate {
                validators,
                policy,
                halt,
                ..
            } => {
                assert_eq!(validators, 7);
                assert_eq!(policy, Some(ProposerPolicy::Sticky));
                assert_eq!(halt, vec![1, 2]);
            }
            _ => panic!("expected simulate"),
        }
    }
}
