//! Snapshot error types

use ibft_committee::CommitteeError;
use ibft_core::{Address, Hash};
use ibft_crypto::CryptoError;
use thiserror::Error;

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors deriving or persisting validator-set snapshots
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Headers are not contiguous from the snapshot height
    #[error("Invalid voting chain: expected block {expected}, got {actual}")]
    InvalidVotingChain { expected: u64, actual: u64 },

    /// Header sealed by a non-validator
    #[error("Unauthorized signer {signer} at block {number}")]
    Unauthorized { signer: Address, number: u64 },

    /// A header needed for replay is missing
    #[error("Unknown ancestor {hash} at block {number}")]
    UnknownAncestor { number: u64, hash: Hash },

    /// Genesis header carries no validators
    #[error("Genesis has no validators")]
    EmptyGenesis,

    #[error("Committee error: {0}")]
    Committee(#[from] CommitteeError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for SnapshotError {
    fn from(err: bincode::Error) -> Self {
        SnapshotError::Serialization(err.to_string())
    }
}
