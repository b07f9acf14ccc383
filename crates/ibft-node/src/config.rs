//! Node configuration types

use crate::error::{NodeError, Result};
use ibft_consensus::ConsensusConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Governance parameters of the chain, the defaults the snapshot manager starts from
pub type GovernanceConfig = ibft_snapshot::ParamSet;

/// Prefix of environment variables overriding file settings
pub const ENV_PREFIX: &str = "IBFT";

/// Complete node configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identity settings
    #[serde(default)]
    pub node: NodeSettings,

    /// Consensus timing and buffers
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Snapshot checkpointing
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Chain governance parameters
    #[serde(default)]
    pub governance: GovernanceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl NodeConfig {
    /// Load from a TOML file, then apply `IBFT_` environment overrides
    ///
    /// Nested keys use a double underscore, e.g.
    /// `IBFT_CONSENSUS__REQUEST_TIMEOUT_MS=500`. A missing file yields the
    /// defaults plus overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: NodeConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment overrides
    pub fn from_toml(document: &str) -> Result<Self> {
        let config: NodeConfig = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.consensus.request_timeout_ms == 0 {
            return Err(NodeError::InvalidConfig(
                "consensus.request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.node.block_interval_ms >= self.consensus.request_timeout_ms {
            return Err(NodeError::InvalidConfig(
                "node.block_interval_ms must be shorter than consensus.request_timeout_ms".to_string(),
            ));
        }
        if self.governance.committee_size == 0 {
            return Err(NodeError::InvalidConfig(
                "governance.committee_size must be positive".to_string(),
            ));
        }
        if self.governance.epoch == 0 {
            return Err(NodeError::InvalidConfig(
                "governance.epoch must be positive".to_string(),
            ));
        }
        if self.snapshot.checkpoint_interval == 0 {
            return Err(NodeError::InvalidConfig(
                "snapshot.checkpoint_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Basic node settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Chain identifier
    #[serde(default = "default_chain_id")]
    pub chain_id: String,

    /// Node name
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Prefix of the validator key seeds; the chain id when unset
    #[serde(default)]
    pub key_seed: Option<String>,

    /// Delay between committing a block and proposing the next one
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,
}

fn default_chain_id() -> String {
    "ibft-devnet".to_string()
}

fn default_node_name() -> String {
    "ibft-node".to_string()
}

fn default_block_interval_ms() -> u64 {
    1_000
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            name: default_node_name(),
            key_seed: None,
            block_interval_ms: default_block_interval_ms(),
        }
    }
}

/// Snapshot persistence settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Blocks between stored checkpoints
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    /// Recent snapshots kept in memory
    #[serde(default = "default_memory_cache_capacity")]
    pub memory_cache_capacity: usize,

    /// Checkpoint directory; checkpoints stay in memory when unset
    #[serde(default)]
    pub data_dir: Option<String>,
}

fn default_checkpoint_interval() -> u64 {
    ibft_snapshot::DEFAULT_CHECKPOINT_INTERVAL
}

fn default_memory_cache_capacity() -> usize {
    ibft_snapshot::DEFAULT_RECENT_SNAPSHOTS
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: default_checkpoint_interval(),
            memory_cache_capacity: default_memory_cache_capacity(),
            data_dir: None,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Color output
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: true,
        }
    }
}

/// Metrics configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics address
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

fn default_metrics_address() -> String {
    "127.0.0.1:9615".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
        }
    }
}
