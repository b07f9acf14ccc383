//! Node error types

use ibft_consensus::ConsensusError;
use ibft_snapshot::SnapshotError;
use thiserror::Error;

/// Result type for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Errors raised by node plumbing
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("TOML decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Block does not extend the local head
    #[error("Block {number} does not extend head {head}")]
    NotNextBlock { number: u64, head: u64 },

    /// Imported block lacks a quorum of valid committed seals
    #[error("Block {number} has {valid} valid committed seals, {required} required")]
    InsufficientSeals {
        number: u64,
        valid: usize,
        required: usize,
    },

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
