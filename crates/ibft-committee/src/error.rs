//! Committee error types

use ibft_core::Address;
use ibft_crypto::CryptoError;
use thiserror::Error;

/// Result type for committee operations
pub type Result<T> = std::result::Result<T, CommitteeError>;

/// Errors in committee derivation and sender authorization
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitteeError {
    /// The qualified set is empty
    #[error("No qualified validator")]
    NoValidator,

    /// Signer is not a qualified validator
    #[error("Unauthorized signer: {0}")]
    Unauthorized(Address),

    /// Signature could not be recovered
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
