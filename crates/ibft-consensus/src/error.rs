//! Consensus error types

use ibft_committee::CommitteeError;
use ibft_core::Address;
use ibft_crypto::CryptoError;
use std::time::Duration;
use thiserror::Error;

/// Result type for consensus operations
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Errors raised while handling consensus events
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Message bytes or payload could not be decoded
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Recovered signer differs from the claimed sender
    #[error("Invalid signer: claimed {claimed}, recovered {recovered}")]
    InvalidSigner { claimed: Address, recovered: Address },

    /// Sender is not allowed to send this message
    #[error("Unauthorized sender: {0}")]
    Unauthorized(Address),

    /// Preprepare not sent by the round's proposer
    #[error("Message not from proposer")]
    NotFromProposer,

    /// Message for a view ahead of ours
    #[error("Future message")]
    FutureMessage,

    /// Message for a view behind ours
    #[error("Old message")]
    OldMessage,

    /// Prepare or commit for a different subject
    #[error("Inconsistent subject")]
    InconsistentSubject,

    /// Committed seal not produced by the sender
    #[error("Invalid committed seal")]
    InvalidCommittedSeal,

    /// Round change for a round we do not act on
    #[error("Message ignored")]
    Ignored,

    /// Proposal rejected by the backend
    #[error("Proposal verification failed: {0}")]
    Verification(String),

    /// Proposal timestamped in the future
    #[error("Future block, retry in {0:?}")]
    FutureBlock(Duration),

    /// Committee could not be derived
    #[error("Committee error: {0}")]
    Committee(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Backend refused to commit
    #[error("Commit failed: {0}")]
    Commit(String),

    /// Core has not been started
    #[error("Engine not started")]
    NotStarted,

    /// Engine task is gone
    #[error("Engine stopped")]
    Stopped,
}

impl ConsensusError {
    /// Message should be kept and retried once our view catches up
    pub fn is_future(&self) -> bool {
        matches!(self, ConsensusError::FutureMessage)
    }

    pub fn is_old(&self) -> bool {
        matches!(self, ConsensusError::OldMessage)
    }

    /// Error prevents the engine from knowing its committee
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsensusError::Committee(_) | ConsensusError::NotStarted)
    }
}

impl From<CommitteeError> for ConsensusError {
    fn from(err: CommitteeError) -> Self {
        ConsensusError::Committee(err.to_string())
    }
}

impl From<bincode::Error> for ConsensusError {
    fn from(err: bincode::Error) -> Self {
        ConsensusError::InvalidMessage(err.to_string())
    }
}

/// Outcome of proposal verification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Valid but timestamped ahead; retry after the delay
    #[error("Future block, retry in {0:?}")]
    FutureBlock(Duration),

    /// Proposal is invalid
    #[error("Invalid proposal: {0}")]
    Invalid(String),
}
